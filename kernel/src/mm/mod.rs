//! Memory Management subsystem
//!
//! Три уровня / Three layers:
//!   pmm  — физические кадры из карты памяти Limine / frames from the Limine memory map
//!   vmm  — HHDM и режимы кеширования / HHDM and page cache modes
//!   heap — Kernel Heap (Slab Allocator)

pub mod heap;
pub mod pmm;
pub mod vmm;

/// Физический адрес / Physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Виртуальный адрес / Virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }
}

impl VirtAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }
}

/// Подключить usable-регионы и HHDM; после этого работают Box<T>, Vec<T>.
/// Hand usable regions and the HHDM to the allocators; Box<T>, Vec<T> work after this.
pub fn init(usable: impl Iterator<Item = (u64, u64)>, hhdm_offset: u64) {
    vmm::set_hhdm_offset(hhdm_offset);
    pmm::init(usable, hhdm_offset);
    heap::init();
}
