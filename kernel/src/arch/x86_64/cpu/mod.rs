//! CPU bring-up — per-core initialization and extended-state management
//!
//! Слои / Layers:
//!   regs      — регистры через крейт `x86_64` / registers via the `x86_64` crate
//!   features  — CPUID → `CapabilitySet`
//!   xstate    — выбор XSAVE/FXSAVE / XSAVE vs FXSAVE strategy
//!   init      — последовательность на каждом ядре / per-core sequence
//!
//! Everything above `regs` talks to the processor through [`Hardware`], so
//! the sequence can run against a simulated register file in tests.

use core::arch::x86_64::CpuidResult;

use log::info;
use spin::Mutex;

use super::regs::{self, Cr0, Cr0Flags, Cr4, Cr4Flags, Msr, XCr0, XCr0Flags};

pub mod features;
pub mod init;
pub mod xstate;

#[cfg(test)]
pub(crate) mod sim;

pub use features::{detect, CapabilitySet, Features};
pub use init::{init_core, PAT_UPPER};
pub use xstate::{ExtendedState, SaveArea, FXSAVE_AREA_SIZE};

/// Доступ к регистрам процессора.
/// Access to processor registers.
///
/// Implementations never report failure; an unsupported register faults
/// in hardware.
pub trait Hardware {
    /// CPUID at `leaf`/`subleaf`, or `None` if the leaf is above the
    /// processor's reported maximum.
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Option<CpuidResult>;

    fn cr0(&self) -> Cr0Flags;
    fn set_cr0(&mut self, value: Cr0Flags);

    fn cr4(&self) -> Cr4Flags;
    fn set_cr4(&mut self, value: Cr4Flags);

    fn rdmsr(&self, msr: u32) -> u64;
    fn wrmsr(&mut self, msr: u32, value: u64);

    fn set_xcr0(&mut self, value: XCr0Flags);

    /// Clear RFLAGS.AC.
    fn clac(&mut self);
}

/// Настоящее железо текущего ядра.
/// The real registers of the executing core.
pub struct BareMetal;

impl Hardware for BareMetal {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Option<CpuidResult> {
        let range = leaf & 0x8000_0000;
        let max = regs::cpuid(range, 0).eax;
        (leaf <= max).then(|| regs::cpuid(leaf, subleaf))
    }

    fn cr0(&self) -> Cr0Flags {
        Cr0::read()
    }

    fn set_cr0(&mut self, value: Cr0Flags) {
        unsafe { Cr0::write(value) };
    }

    fn cr4(&self) -> Cr4Flags {
        Cr4::read()
    }

    fn set_cr4(&mut self, value: Cr4Flags) {
        unsafe { Cr4::write(value) };
    }

    fn rdmsr(&self, msr: u32) -> u64 {
        unsafe { Msr::new(msr).read() }
    }

    fn wrmsr(&mut self, msr: u32, value: u64) {
        unsafe { Msr::new(msr).write(value) };
    }

    fn set_xcr0(&mut self, value: XCr0Flags) {
        unsafe { XCr0::write(value) };
    }

    fn clac(&mut self) {
        regs::clac();
    }
}

// ── Блокировка инициализации / Initialization lock ───────────────────────────

/// Сериализует последовательность инициализации между ядрами.
/// Serializes the per-core initialization sequence across cores.
///
/// Held for one core's `init_core` and its announcement, never across a
/// blocking wait. No fairness or ordering between cores is promised.
pub struct InitLock(Mutex<()>);

impl InitLock {
    pub const fn new() -> Self {
        Self(Mutex::new(()))
    }

    /// Run `f` with the lock held.
    pub fn serialize<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.0.lock();
        f()
    }
}

impl Default for InitLock {
    fn default() -> Self {
        Self::new()
    }
}

pub static INIT_LOCK: InitLock = InitLock::new();

/// Инициализировать загрузочное ядро и зафиксировать стратегию.
/// Initialize the bootstrap core and fix the extended-state strategy.
pub fn bring_up_primary<H: Hardware>(hw: &mut H) -> &'static ExtendedState {
    bring_up(hw, &INIT_LOCK, xstate::install)
}

/// [`bring_up_primary`] against an explicit lock and publication step.
pub fn bring_up<'a, H, P>(hw: &mut H, lock: &InitLock, publish: P) -> &'a ExtendedState
where
    H: Hardware + ?Sized,
    P: FnOnce(ExtendedState) -> &'a ExtendedState,
{
    lock.serialize(|| {
        let state = publish(init_core(hw));
        info!(
            "cpu: {} strategy, {} byte save area",
            state.name(),
            state.area_size()
        );
        state
    })
}
