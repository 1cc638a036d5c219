//! Virtual memory helpers
//!
//! Прямое отображение (HHDM) и биты PTE, выбирающие записи PAT.
//! The direct map (HHDM) and the PTE bits that select PAT entries.
//!
//! Page tables themselves belong to the VMM proper; the CPU bring-up only
//! fixes what PAT entries 4 and 5 mean, and these helpers are how a mapping
//! asks for them. No mapping code in this kernel consumes [`CacheMode`] yet;
//! it is the interface the page-table code will build PTEs with.

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::{PhysAddr, VirtAddr};

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + HHDM_OFFSET.load(Ordering::Acquire))
}

/// Only valid for addresses inside the direct map.
pub fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u64() - HHDM_OFFSET.load(Ordering::Acquire))
}

bitflags! {
    /// Флаги страницы (4KB PTE) / Page flags (4KB PTE)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        /// PAT index bit 0
        const WRITE_THROUGH = 1 << 3;
        /// PAT index bit 1
        const CACHE_DISABLE = 1 << 4;
        /// PAT index bit 2 (4KB pages only; bit 12 in large pages)
        const PAT           = 1 << 7;
        const GLOBAL        = 1 << 8;
        const NO_EXEC       = 1 << 63;
    }
}

/// Режим кеширования страницы.
/// Page cache mode, one per PAT entry in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    WriteBack,
    WriteThrough,
    UncachedMinus,
    Uncacheable,
    /// PAT entry 4, programmed during CPU bring-up
    WriteProtect,
    /// PAT entry 5, programmed during CPU bring-up; framebuffers
    WriteCombining,
}

impl CacheMode {
    /// PAT entry this mode selects.
    pub const fn pat_index(self) -> usize {
        match self {
            Self::WriteBack      => 0,
            Self::WriteThrough   => 1,
            Self::UncachedMinus  => 2,
            Self::Uncacheable    => 3,
            Self::WriteProtect   => 4,
            Self::WriteCombining => 5,
        }
    }

    /// Architectural memory-type encoding stored in that PAT entry.
    pub const fn memory_type(self) -> u8 {
        match self {
            Self::Uncacheable    => 0x00,
            Self::WriteCombining => 0x01,
            Self::WriteThrough   => 0x04,
            Self::WriteProtect   => 0x05,
            Self::WriteBack      => 0x06,
            Self::UncachedMinus  => 0x07,
        }
    }

    /// PTE bits for a 4KB mapping.
    pub fn pte_flags(self) -> PageFlags {
        let index = self.pat_index();
        let mut flags = PageFlags::empty();
        flags.set(PageFlags::WRITE_THROUGH, index & 0b001 != 0);
        flags.set(PageFlags::CACHE_DISABLE, index & 0b010 != 0);
        flags.set(PageFlags::PAT,           index & 0b100 != 0);
        flags
    }
}
