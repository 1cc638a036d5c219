//! Ferrox Kernel — точка входа / entry point

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
mod kernel {
    use core::panic::PanicInfo;

    use ferrox::config::BootConfig;
    use ferrox::{arch, boot, drivers, kprintln, mm, time};

    /// Точка входа ядра — вызывается из `_start` на стеке BSP.
    /// Kernel entry point — called from `_start` on the BSP stack.
    #[no_mangle]
    pub extern "C" fn kernel_main() -> ! {
        // 0. UART — первым делом / first of all
        drivers::uart::init();
        kprintln!("Ferrox booting...");

        if let Err(err) = boot::check() {
            panic!("{}", err);
        }

        // 1. Командная строка + логгер / Command line + logger
        let config = BootConfig::parse(boot::cmdline()).unwrap_or_else(|err| {
            kprintln!("[config] {} — using defaults", err);
            BootConfig::default()
        });
        drivers::logger::init(config.log_level);
        log::info!("config: {:?}", config);

        // 2. Память — после этого работают Box<T>, Vec<T>!
        //    Memory — after this Box<T>, Vec<T> work!
        let usable = boot::usable_memory().unwrap_or_else(|err| panic!("{}", err));
        mm::init(usable, boot::hhdm_offset());

        // 3. Загрузочное ядро: CR/MSR/XCR0 + стратегия FPU
        //    Bootstrap core: CR/MSR/XCR0 + FPU strategy
        let xstate = arch::init();
        log::info!("cpu: bootstrap processor ready, {} byte FPU save area", xstate.area_size());

        // 4. Таймер для задержек / Delay source
        time::init();

        // 5. Вторичные ядра / Secondary cores
        if config.smp {
            match arch::current::smp::start_secondaries() {
                Ok(report) => log::info!(
                    "smp: {}/{} secondary processors online",
                    report.online, report.secondaries
                ),
                Err(err) => panic!("{}", err),
            }
        } else {
            log::info!("smp: disabled by command line");
        }

        kprintln!("");
        kprintln!("  Kernel ready.");
        kprintln!("");

        arch::current::halt_loop()
    }

    /// Panic handler — выводим в UART и halt.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        kprintln!("\n[KERNEL PANIC] {}", info);
        arch::current::halt_loop()
    }
}

/// Hosted builds only exist so `cargo test` can build the workspace.
#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("the Ferrox kernel image must be built for x86_64-unknown-none");
}
