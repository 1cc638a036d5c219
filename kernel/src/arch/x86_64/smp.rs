//! x86_64 SMP — Limine MP hand-off and the secondary-core trampoline
//!
//! Единственное место, где адреса превращаются в исполнение.
//! The only place where addresses turn into execution.
//!
//! Limine parks every AP on its own small stack, spinning on the
//! `goto_address` field of its `Cpu` record. Writing the field releases the
//! core into [`ap_entry`], which looks up the core's published descriptor,
//! moves onto the descriptor's stack and runs the common trampoline body.

use alloc::alloc::{alloc, Layout};
use alloc::vec::Vec;
use core::arch::asm;

use limine::mp::Cpu;
use log::error;
use spin::Once;

use super::apic::LocalApic;
use super::cpu::{xstate, BareMetal, INIT_LOCK};
use crate::smp::{self, BringUpReport, CoreDescriptor, Platform, StackRegion};

/// System V requires 16-byte stack alignment at call sites.
const STACK_ALIGN: usize = 16;

/// Дескрипторы, видимые трамплину. Пишутся один раз до старта AP.
/// Descriptors visible to the trampoline. Written once before any AP starts.
static CORES: Once<Vec<CoreDescriptor>> = Once::new();

/// Платформа поверх ответа Limine MP.
/// Platform over the Limine MP response.
pub struct LiminePlatform<'a> {
    cpus: &'a [&'a Cpu],
}

impl<'a> LiminePlatform<'a> {
    pub fn new(cpus: &'a [&'a Cpu]) -> Self {
        Self { cpus }
    }
}

impl Platform for LiminePlatform<'_> {
    fn allocate_stack(&mut self, len: usize) -> Option<StackRegion> {
        let layout = Layout::from_size_align(len, STACK_ALIGN).ok()?;
        // Null on exhaustion; the coordinator turns that into a fatal error
        let base = unsafe { alloc(layout) };
        (!base.is_null()).then(|| StackRegion { base: base as usize, len })
    }

    fn trampoline(&self) -> usize {
        ap_entry as usize
    }

    unsafe fn publish(&mut self, descriptors: &[CoreDescriptor]) {
        let table = CORES.call_once(|| descriptors.to_vec());
        for cpu in self.cpus {
            // The BSP ignores goto_address; skip it anyway
            if table.iter().any(|d| d.lapic_id == cpu.lapic_id && !d.bootstrap) {
                cpu.goto_address.write(ap_entry);
            }
        }
    }

    fn sleep_us(&mut self, us: u64) {
        crate::time::sleep_us(us);
    }
}

/// Запустить вторичные ядра из ответа Limine.
/// Start the secondary cores from the Limine response.
pub fn start_secondaries() -> Result<BringUpReport, crate::boot::Error> {
    let (cores, cpus) = crate::boot::cores()?;
    let mut platform = LiminePlatform::new(cpus);
    smp::bring_up_all(&mut platform, &cores, &smp::ONLINE).map_err(crate::boot::Error::Smp)
}

/// Точка входа AP (стек Limine).
/// AP entry point, still on the Limine-provided stack.
unsafe extern "C" fn ap_entry(cpu: &Cpu) -> ! {
    let descriptor = CORES
        .get()
        .and_then(|table| table.iter().find(|d| d.lapic_id == cpu.lapic_id));
    match descriptor {
        // SAFETY: the descriptor's stack was allocated for this core alone.
        Some(descriptor) => unsafe { switch_stack(descriptor) },
        None => {
            error!("cpu: no descriptor for processor {}", cpu.lapic_id);
            super::halt_loop()
        }
    }
}

/// Switch to the descriptor's stack and continue in [`ap_main`].
///
/// # Safety
///
/// `descriptor.stack_top` must be the top of a stack owned by the
/// executing core; the current stack is abandoned.
unsafe fn switch_stack(descriptor: &'static CoreDescriptor) -> ! {
    unsafe {
        asm!(
            "mov rsp, {top}",
            "xor ebp, ebp",
            "call {main}",
            "ud2",
            top  = in(reg) descriptor.stack_top,
            main = sym ap_main,
            in("rdi") descriptor as *const CoreDescriptor,
            options(noreturn),
        )
    }
}

extern "C" fn ap_main(descriptor: &'static CoreDescriptor) -> ! {
    let apic = LocalApic::new(crate::boot::hhdm_offset());
    smp::start_secondary(
        &mut BareMetal,
        &INIT_LOCK,
        &apic,
        descriptor,
        &smp::ONLINE,
        &xstate::EXTENDED_STATE,
    );
    super::halt_loop()
}
