//! Feature Probe — CPUID → `CapabilitySet`
//!
//! Листья / Leaves:
//!   0x1     ECX — XSAVE, OSXSAVE, AVX, x2APIC
//!   0x7/0   EBX — SMEP, AVX512F, SMAP;  ECX — UMIP
//!   0xD/0   EBX — размер области для текущего XCR0 / area size for current XCR0
//!           ECX — размер для всех компонентов / size for every component
//!
//! A leaf the processor does not implement contributes nothing: its flags
//! stay clear and its sizes stay zero.

use bitflags::bitflags;

use super::Hardware;

// CPUID.1:ECX
const LEAF1_ECX_X2APIC:  u32 = 1 << 21;
const LEAF1_ECX_XSAVE:   u32 = 1 << 26;
const LEAF1_ECX_OSXSAVE: u32 = 1 << 27;
const LEAF1_ECX_AVX:     u32 = 1 << 28;

// CPUID.7.0:EBX / ECX
const LEAF7_EBX_SMEP:    u32 = 1 << 7;
const LEAF7_EBX_AVX512F: u32 = 1 << 16;
const LEAF7_EBX_SMAP:    u32 = 1 << 20;
const LEAF7_ECX_UMIP:    u32 = 1 << 2;

bitflags! {
    /// Необязательные возможности процессора.
    /// Optional processor capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        /// Supervisor-mode execution prevention
        const SMEP    = 1 << 0;
        /// Supervisor-mode access prevention
        const SMAP    = 1 << 1;
        /// User-mode instruction prevention
        const UMIP    = 1 << 2;
        /// XSAVE family is implemented
        const XSAVE   = 1 << 3;
        /// CR4.OSXSAVE is set, i.e. XSAVE has been enabled by the OS
        const OSXSAVE = 1 << 4;
        const AVX     = 1 << 5;
        const AVX512F = 1 << 6;
        const X2APIC  = 1 << 7;
    }
}

/// Снимок возможностей одного ядра. Никогда не кешируется.
/// Capability snapshot of one core. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    pub features: Features,
    /// XSAVE area size for the components currently enabled in XCR0.
    pub xsave_area_size: u32,
    /// XSAVE area size if every supported component were enabled.
    pub xsave_area_max: u32,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self { features: Features::empty(), xsave_area_size: 0, xsave_area_max: 0 }
    }
}

impl CapabilitySet {
    pub fn has(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }
}

/// Опросить CPUID текущего ядра.
/// Query CPUID on the executing core.
pub fn detect<H: Hardware + ?Sized>(hw: &H) -> CapabilitySet {
    let mut caps = CapabilitySet::default();

    if let Some(leaf) = hw.cpuid(0x1, 0) {
        caps.features.set(Features::X2APIC,  leaf.ecx & LEAF1_ECX_X2APIC != 0);
        caps.features.set(Features::XSAVE,   leaf.ecx & LEAF1_ECX_XSAVE != 0);
        caps.features.set(Features::OSXSAVE, leaf.ecx & LEAF1_ECX_OSXSAVE != 0);
        caps.features.set(Features::AVX,     leaf.ecx & LEAF1_ECX_AVX != 0);
    }

    if let Some(leaf) = hw.cpuid(0x7, 0) {
        caps.features.set(Features::SMEP,    leaf.ebx & LEAF7_EBX_SMEP != 0);
        caps.features.set(Features::AVX512F, leaf.ebx & LEAF7_EBX_AVX512F != 0);
        caps.features.set(Features::SMAP,    leaf.ebx & LEAF7_EBX_SMAP != 0);
        caps.features.set(Features::UMIP,    leaf.ecx & LEAF7_ECX_UMIP != 0);
    }

    // Leaf 0xD sizes are only meaningful once XSAVE is enabled
    if caps.has(Features::OSXSAVE) {
        if let Some(leaf) = hw.cpuid(0xD, 0) {
            caps.xsave_area_size = leaf.ebx;
            caps.xsave_area_max  = leaf.ecx;
        }
    }

    caps
}
