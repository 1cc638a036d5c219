//! x86_64 platform

pub mod apic;
pub mod cpu;
pub mod regs;
pub mod smp;

#[cfg(target_os = "none")]
mod boot;

/// x86_64 init sequence for the bootstrap processor.
pub fn init() -> &'static cpu::ExtendedState {
    cpu::bring_up_primary(&mut cpu::BareMetal)
}

/// Остановить ядро навсегда.
/// Park this core forever.
pub fn halt_loop() -> ! {
    loop {
        regs::hlt();
    }
}
