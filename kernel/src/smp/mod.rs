//! Multiprocessor Bootstrap Coordinator
//!
//! Запуск вторичных ядер / Secondary core bring-up:
//!   1. один стек 32KB на каждое ядро / one 32KB stack per reported core
//!   2. публикация дескрипторов / publish descriptors (entry + stack top)
//!   3. фиксированная пауза 50ms / fixed 50ms settling delay
//!
//! There is no per-core handshake: a core that has not finished within the
//! delay is not waited for. The `online` counter is only read afterwards to
//! report cores that were not seen.
//!
//! Raw addresses stop here: the [`Platform`] implementation is the only code
//! that turns a [`CoreDescriptor`] into something a processor executes.

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};
use spin::Once;

use crate::arch::current::cpu::{init_core, xstate, ExtendedState, Hardware, InitLock};
use crate::config::{AP_STACK_SIZE, SETTLE_DELAY_US};

/// Запись о ядре из загрузчика.
/// One core as reported by the boot hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInfo {
    pub id:        u32,
    pub lapic_id:  u32,
    pub bootstrap: bool,
}

/// Стек, принадлежащий одному ядру. Никогда не освобождается.
/// A stack owned by exactly one core. Never freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub len:  usize,
}

impl StackRegion {
    pub fn top(&self) -> usize {
        self.base + self.len
    }
}

/// Опубликованный дескриптор ядра. Только чтение после публикации.
/// Published core descriptor. Read-only once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreDescriptor {
    pub id:        u32,
    pub lapic_id:  u32,
    pub bootstrap: bool,
    pub stack:     StackRegion,
    /// Initial stack pointer: top of `stack`.
    pub stack_top: usize,
    /// Trampoline address the core starts executing.
    pub entry:     usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The allocator could not provide a stack for this core.
    StackAllocation { core: u32 },
    /// The boot hand-off reported no cores at all.
    NoCores,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackAllocation { core } => {
                write!(f, "out of memory allocating a {} byte stack for core {}", AP_STACK_SIZE, core)
            }
            Self::NoCores => f.write_str("boot hand-off reported no cores"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Всё, что координатору нужно от платформы.
/// Everything the coordinator needs from the platform.
pub trait Platform {
    /// Stack memory for one core; `None` when memory is exhausted.
    fn allocate_stack(&mut self, len: usize) -> Option<StackRegion>;

    /// Address of the secondary-core trampoline.
    fn trampoline(&self) -> usize;

    /// Hand the descriptors to the processors. Secondary cores may start
    /// executing before this returns.
    ///
    /// # Safety
    ///
    /// Every descriptor's stack must come from [`allocate_stack`] on this
    /// platform, be owned by that core alone, and stay valid forever.
    ///
    /// [`allocate_stack`]: Platform::allocate_stack
    unsafe fn publish(&mut self, descriptors: &[CoreDescriptor]);

    /// Block for at least `us` microseconds.
    fn sleep_us(&mut self, us: u64);
}

/// Контроллер прерываний ядра.
/// Per-core interrupt controller.
pub trait LocalController {
    /// Bring the executing core's controller online.
    fn bring_online(&self, lapic_id: u32);
}

/// Ядра, объявившие готовность / Cores that announced themselves online.
pub static ONLINE: AtomicUsize = AtomicUsize::new(0);

/// Allocate a stack and build a descriptor for every reported core,
/// the bootstrap core included.
pub fn prepare<P: Platform + ?Sized>(platform: &mut P, cores: &[CoreInfo]) -> Result<Vec<CoreDescriptor>> {
    if cores.is_empty() {
        return Err(Error::NoCores);
    }
    let entry = platform.trampoline();
    cores
        .iter()
        .map(|core| {
            let stack = platform
                .allocate_stack(AP_STACK_SIZE)
                .ok_or(Error::StackAllocation { core: core.id })?;
            Ok(CoreDescriptor {
                id:        core.id,
                lapic_id:  core.lapic_id,
                bootstrap: core.bootstrap,
                stack,
                stack_top: stack.top(),
                entry,
            })
        })
        .collect()
}

/// Итог запуска / Bring-up summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringUpReport {
    pub reported:    usize,
    pub secondaries: usize,
    /// Secondary cores that announced themselves before the delay ran out.
    pub online:      usize,
}

impl BringUpReport {
    pub fn missing(&self) -> usize {
        self.secondaries.saturating_sub(self.online)
    }
}

/// Запустить все вторичные ядра.
/// Bring every secondary core online.
///
/// Called once by the bootstrap core after its own initialization.
pub fn bring_up_all<P: Platform + ?Sized>(
    platform: &mut P,
    cores: &[CoreInfo],
    online: &AtomicUsize,
) -> Result<BringUpReport> {
    info!("cpu: {} processors reported", cores.len());
    if let Some(bsp) = cores.iter().find(|core| core.bootstrap) {
        info!("cpu: processor {} online", bsp.lapic_id);
    }

    let descriptors = prepare(platform, cores)?;
    // SAFETY: every stack was just allocated by this platform, one per core.
    unsafe { platform.publish(&descriptors) };

    platform.sleep_us(SETTLE_DELAY_US);

    let report = BringUpReport {
        reported:    cores.len(),
        secondaries: cores.iter().filter(|core| !core.bootstrap).count(),
        online:      online.load(Ordering::Acquire),
    };
    if report.missing() > 0 {
        // TODO: replace the fixed delay with a per-core acknowledgment wait
        warn!(
            "cpu: {} of {} secondary processors not online after {}us",
            report.missing(), report.secondaries, SETTLE_DELAY_US
        );
    }
    Ok(report)
}

/// Тело трамплина без привязки к железу.
/// Hardware-independent trampoline body.
///
/// Runs on the secondary core's own stack. Returns with the lock released;
/// the caller parks the core.
pub fn start_secondary<H, C>(
    hw: &mut H,
    lock: &InitLock,
    controller: &C,
    descriptor: &CoreDescriptor,
    online: &AtomicUsize,
    strategy: &Once<ExtendedState>,
) where
    H: Hardware + ?Sized,
    C: LocalController + ?Sized,
{
    lock.serialize(|| {
        xstate::publish(strategy, init_core(hw));
        controller.bring_online(descriptor.lapic_id);
        info!("cpu: processor {} online", descriptor.lapic_id);
        online.fetch_add(1, Ordering::Release);
    });
}
