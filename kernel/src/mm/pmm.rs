//! Physical Memory Manager — кадры из карты памяти Limine
//! Physical Memory Manager — frames from the Limine memory map
//!
//! Блоки по 2^order страниц / Blocks of 2^order pages:
//!   - order 0 = 4KB  (1 страница  / 1 page)
//!   - order 3 = 32KB (стек AP / an AP stack)
//!   - order N = 4KB * 2^N
//!
//! New blocks are carved from usable regions front to back. Freed blocks go
//! onto a per-order free list threaded through the blocks themselves (via
//! the HHDM) and are reused before any fresh memory. There is no buddy
//! merging.

use spin::Mutex;

use super::PhysAddr;

pub const PAGE_SIZE: usize = 4096;
pub const MAX_ORDER: usize = 11; // до 8MB блоков / up to 8MB blocks

const MAX_REGIONS: usize = 64;
const NIL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
struct Region {
    next: u64,
    end:  u64,
}

pub struct FrameAllocator {
    regions: [Region; MAX_REGIONS],
    count:   usize,
    free:    [u64; MAX_ORDER],
    hhdm:    u64,
}

impl FrameAllocator {
    pub const fn new(hhdm: u64) -> Self {
        Self {
            regions: [Region { next: 0, end: 0 }; MAX_REGIONS],
            count:   0,
            free:    [NIL; MAX_ORDER],
            hhdm,
        }
    }

    /// Add a usable region; partial pages at either end are dropped.
    /// Returns `false` if nothing was added.
    pub fn add_region(&mut self, base: u64, len: u64) -> bool {
        let page = PAGE_SIZE as u64;
        let start = base.next_multiple_of(page);
        let end = (base + len) / page * page;
        if start >= end || self.count == MAX_REGIONS {
            return false;
        }
        self.regions[self.count] = Region { next: start, end };
        self.count += 1;
        true
    }

    /// Выделить 2^order физических страниц.
    /// Allocate 2^order contiguous physical pages.
    pub fn alloc(&mut self, order: usize) -> Option<PhysAddr> {
        if order >= MAX_ORDER {
            return None;
        }
        if self.free[order] != NIL {
            let block = self.free[order];
            self.free[order] = unsafe { self.link(block).read() };
            return Some(PhysAddr::new(block));
        }
        let size = (PAGE_SIZE << order) as u64;
        let region = self.regions[..self.count]
            .iter_mut()
            .find(|r| r.end - r.next >= size)?;
        let block = region.next;
        region.next += size;
        Some(PhysAddr::new(block))
    }

    /// Вернуть блок в список свободных.
    /// Return a block to its free list.
    ///
    /// # Safety
    ///
    /// `addr` must come from `alloc(order)` on this allocator and be unused.
    pub unsafe fn free(&mut self, addr: PhysAddr, order: usize) {
        let block = addr.as_u64();
        unsafe { self.link(block).write(self.free[order]) };
        self.free[order] = block;
    }

    /// Bytes never handed out yet (free lists not included).
    pub fn remaining(&self) -> u64 {
        self.regions[..self.count].iter().map(|r| r.end - r.next).sum()
    }

    fn link(&self, block: u64) -> *mut u64 {
        (block + self.hhdm) as *mut u64
    }
}

// SAFETY: the raw links are only touched with the surrounding Mutex held.
unsafe impl Send for FrameAllocator {}

static PMM: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new(0));

pub fn init(usable: impl Iterator<Item = (u64, u64)>, hhdm_offset: u64) {
    let mut pmm = PMM.lock();
    *pmm = FrameAllocator::new(hhdm_offset);
    let mut skipped = 0;
    for (base, len) in usable {
        if !pmm.add_region(base, len) {
            skipped += 1;
        }
    }
    log::info!("mm: {} KiB usable in {} regions", pmm.remaining() / 1024, pmm.count);
    if skipped > 0 {
        log::warn!("mm: {} usable regions ignored", skipped);
    }
}

pub fn alloc(order: usize) -> Option<PhysAddr> {
    PMM.lock().alloc(order)
}

/// # Safety
///
/// See [`FrameAllocator::free`].
pub unsafe fn free(addr: PhysAddr, order: usize) {
    unsafe { PMM.lock().free(addr, order) }
}
