//! Register Access Layer: x86_64
//!
//! Регистры и порты берутся из крейта `x86_64`; здесь только то, чего в нём
//! нет. Control registers, MSRs, XCR0 and port I/O come from the `x86_64`
//! crate; this module adds the MSR numbers and the few raw instructions it
//! does not wrap.
//!
//! None of these report failure: an invalid register or MSR faults in
//! hardware.

use core::arch::asm;
use core::arch::x86_64::CpuidResult;

pub use x86_64::instructions::hlt;
pub use x86_64::instructions::port::Port;
pub use x86_64::registers::control::{Cr0, Cr0Flags, Cr4, Cr4Flags};
pub use x86_64::registers::model_specific::Msr;
pub use x86_64::registers::xcontrol::{XCr0, XCr0Flags};

// ── MSR / Model-specific registers ───────────────────────────────────────────
pub const IA32_APIC_BASE:  u32 = 0x1B;
pub const IA32_PAT:        u32 = 0x277;
pub const X2APIC_SPURIOUS: u32 = 0x80F;

/// Сбросить RFLAGS.AC: доступ к user-страницам снова запрещён SMAP.
/// Clear RFLAGS.AC so SMAP denies supervisor access to user pages again.
///
/// Requires `Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION`, otherwise #UD.
pub fn clac() {
    unsafe { asm!("clac", options(nostack)) };
}

/// Raw CPUID with no max-leaf check.
#[allow(unused_unsafe)]
pub fn cpuid(leaf: u32, subleaf: u32) -> CpuidResult {
    unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) }
}

#[allow(unused_unsafe)]
pub fn rdtsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}
