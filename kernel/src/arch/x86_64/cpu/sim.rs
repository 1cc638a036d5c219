//! Simulated register file for host tests.
//!
//! Models the architectural behavior the init sequence relies on: CPUID
//! limited by the max leaf, CPUID.1:ECX.OSXSAVE mirroring CR4, leaf 0xD
//! sizes following XCR0, and faults (here: panics) for writes real
//! hardware rejects.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::arch::x86_64::CpuidResult;

use super::Hardware;
use crate::arch::x86_64::regs::{Cr0Flags, Cr4Flags, XCr0Flags, IA32_PAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Cr0(Cr0Flags),
    Cr4(Cr4Flags),
    Wrmsr(u32, u64),
    Xcr0(XCr0Flags),
    Clac,
}

#[derive(Debug, Clone)]
pub struct SimCpu {
    pub max_leaf: u32,
    pub smep:     bool,
    pub smap:     bool,
    pub umip:     bool,
    pub xsave:    bool,
    pub avx:      bool,
    pub avx512f:  bool,
    pub x2apic:   bool,

    pub cr0:  Cr0Flags,
    pub cr4:  Cr4Flags,
    pub xcr0: XCr0Flags,
    pub pat:  u64,
    /// RFLAGS.AC
    pub ac:   bool,
    pub msrs: BTreeMap<u32, u64>,

    pub events: Vec<Event>,
}

const PAT_RESET: u64 = 0x0007_0406_0007_0406;

impl SimCpu {
    /// No optional features; `max_leaf` as given.
    pub fn bare(max_leaf: u32) -> Self {
        Self {
            max_leaf,
            smep: false, smap: false, umip: false,
            xsave: false, avx: false, avx512f: false, x2apic: false,
            cr0: Cr0Flags::PROTECTED_MODE_ENABLE | Cr0Flags::PAGING | Cr0Flags::EMULATE_COPROCESSOR,
            cr4: Cr4Flags::PHYSICAL_ADDRESS_EXTENSION,
            xcr0: XCr0Flags::X87,
            pat: PAT_RESET,
            ac: true,
            msrs: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// An early x86_64 part: SSE2 only.
    pub fn legacy() -> Self {
        Self::bare(0x6)
    }

    /// A recent part: SMEP, SMAP, UMIP, XSAVE, AVX, x2APIC; no AVX-512.
    pub fn modern() -> Self {
        Self {
            smep: true, smap: true, umip: true,
            xsave: true, avx: true, x2apic: true,
            ..Self::bare(0x16)
        }
    }

    /// CPUID ignoring the max leaf.
    pub fn cpuid_raw(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        let mut r = CpuidResult { eax: 0, ebx: 0, ecx: 0, edx: 0 };
        match (leaf, subleaf) {
            (0x0, _) => r.eax = self.max_leaf,
            (0x1, _) => {
                r.ecx = bit(self.x2apic, 21)
                    | bit(self.xsave, 26)
                    | bit(self.cr4.contains(Cr4Flags::OSXSAVE), 27)
                    | bit(self.avx, 28);
            }
            (0x7, 0) => {
                r.ebx = bit(self.smep, 7) | bit(self.avx512f, 16) | bit(self.smap, 20);
                r.ecx = bit(self.umip, 2);
            }
            (0xD, 0) if self.xsave => {
                r.ebx = xsave_size(self.xcr0);
                r.ecx = xsave_size(self.supported_xcr0());
            }
            _ => {}
        }
        r
    }

    fn supported_xcr0(&self) -> XCr0Flags {
        let mut mask = XCr0Flags::X87 | XCr0Flags::SSE;
        if self.avx {
            mask |= XCr0Flags::AVX;
        }
        if self.avx512f {
            mask |= XCr0Flags::OPMASK | XCr0Flags::ZMM_HI256 | XCr0Flags::HI16_ZMM;
        }
        mask
    }
}

fn bit(set: bool, n: u32) -> u32 {
    (set as u32) << n
}

/// Standard-format XSAVE size: end of the highest enabled component.
fn xsave_size(mask: XCr0Flags) -> u32 {
    if mask.intersects(XCr0Flags::HI16_ZMM) {
        1664 + 1024
    } else if mask.intersects(XCr0Flags::ZMM_HI256) {
        1152 + 512
    } else if mask.intersects(XCr0Flags::OPMASK) {
        1088 + 64
    } else if mask.contains(XCr0Flags::AVX) {
        576 + 256
    } else {
        512 + 64
    }
}

impl Hardware for SimCpu {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Option<CpuidResult> {
        (leaf <= self.max_leaf).then(|| self.cpuid_raw(leaf, subleaf))
    }

    fn cr0(&self) -> Cr0Flags {
        self.cr0
    }

    fn set_cr0(&mut self, value: Cr0Flags) {
        self.cr0 = value;
        self.events.push(Event::Cr0(value));
    }

    fn cr4(&self) -> Cr4Flags {
        self.cr4
    }

    fn set_cr4(&mut self, value: Cr4Flags) {
        let leaf7 = self.max_leaf >= 0x7;
        assert!(!value.contains(Cr4Flags::SUPERVISOR_MODE_EXECUTION_PROTECTION) || (leaf7 && self.smep), "#GP: SMEP unsupported");
        assert!(!value.contains(Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION) || (leaf7 && self.smap), "#GP: SMAP unsupported");
        assert!(!value.contains(Cr4Flags::USER_MODE_INSTRUCTION_PREVENTION) || (leaf7 && self.umip), "#GP: UMIP unsupported");
        assert!(!value.contains(Cr4Flags::OSXSAVE) || self.xsave, "#GP: XSAVE unsupported");
        self.cr4 = value;
        self.events.push(Event::Cr4(value));
    }

    fn rdmsr(&self, msr: u32) -> u64 {
        match msr {
            IA32_PAT => self.pat,
            _ => self.msrs.get(&msr).copied().unwrap_or(0),
        }
    }

    fn wrmsr(&mut self, msr: u32, value: u64) {
        match msr {
            IA32_PAT => self.pat = value,
            _ => {
                self.msrs.insert(msr, value);
            }
        }
        self.events.push(Event::Wrmsr(msr, value));
    }

    fn set_xcr0(&mut self, value: XCr0Flags) {
        assert!(self.cr4.contains(Cr4Flags::OSXSAVE), "#UD: XSETBV with CR4.OSXSAVE clear");
        assert!(value.contains(XCr0Flags::X87), "#GP: XCR0.X87 must be set");
        assert!(self.supported_xcr0().contains(value), "#GP: unsupported XCR0 component");
        let avx512 = XCr0Flags::OPMASK | XCr0Flags::ZMM_HI256 | XCr0Flags::HI16_ZMM;
        assert!(
            !value.intersects(avx512) || value.contains(avx512 | XCr0Flags::AVX),
            "#GP: AVX-512 components need AVX and each other"
        );
        self.xcr0 = value;
        self.events.push(Event::Xcr0(value));
    }

    fn clac(&mut self) {
        assert!(self.cr4.contains(Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION), "#UD: CLAC with CR4.SMAP clear");
        self.ac = false;
        self.events.push(Event::Clac);
    }
}
