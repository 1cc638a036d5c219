//! Kernel Heap — Slab Allocator
//!
//! Малые объекты (≤ 2KB) — из slab-кешей, крупные — целыми блоками PMM.
//! Small objects (≤ 2KB) come from slab caches, large ones straight from
//! PMM blocks. AP stacks (32KB) and XSAVE areas take the large path.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};
use spin::Mutex;

use super::pmm::{self, PAGE_SIZE};
use super::vmm::{phys_to_virt, virt_to_phys};
use super::VirtAddr;

const SLAB_SIZES: [usize; 9] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048];
const NUM_SLABS:  usize = SLAB_SIZES.len();

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

// NonNull не Send по умолчанию — оборачиваем
// NonNull is not Send by default — wrap it
struct FreeList(Option<NonNull<FreeNode>>);
unsafe impl Send for FreeList {}

struct SlabCache {
    obj_size: usize,
    free:     FreeList,
}

impl SlabCache {
    const fn new(obj_size: usize) -> Self {
        Self { obj_size, free: FreeList(None) }
    }

    /// Нарезать новую страницу на объекты. `false` если PMM пуст.
    /// Carve a fresh page into objects. `false` if the PMM is empty.
    fn grow(&mut self) -> bool {
        let Some(phys) = pmm::alloc(0) else { return false };
        let start = phys_to_virt(phys).as_u64() as usize;
        let count = PAGE_SIZE / self.obj_size;

        for i in (0..count).rev() {
            let ptr = (start + i * self.obj_size) as *mut FreeNode;
            unsafe {
                ptr.write(FreeNode { next: self.free.0 });
                self.free.0 = NonNull::new(ptr);
            }
        }
        true
    }

    fn alloc(&mut self) -> Option<*mut u8> {
        if self.free.0.is_none() && !self.grow() {
            return None;
        }
        let node = self.free.0?;
        unsafe { self.free.0 = (*node.as_ptr()).next; }
        Some(node.as_ptr() as *mut u8)
    }

    fn free(&mut self, ptr: *mut u8) {
        let node = ptr as *mut FreeNode;
        unsafe {
            node.write(FreeNode { next: self.free.0 });
            self.free.0 = NonNull::new(node);
        }
    }
}

pub struct KernelHeap {
    slabs: [Mutex<SlabCache>; NUM_SLABS],
}

impl KernelHeap {
    const fn new() -> Self {
        Self {
            slabs: [
                Mutex::new(SlabCache::new(SLAB_SIZES[0])),
                Mutex::new(SlabCache::new(SLAB_SIZES[1])),
                Mutex::new(SlabCache::new(SLAB_SIZES[2])),
                Mutex::new(SlabCache::new(SLAB_SIZES[3])),
                Mutex::new(SlabCache::new(SLAB_SIZES[4])),
                Mutex::new(SlabCache::new(SLAB_SIZES[5])),
                Mutex::new(SlabCache::new(SLAB_SIZES[6])),
                Mutex::new(SlabCache::new(SLAB_SIZES[7])),
                Mutex::new(SlabCache::new(SLAB_SIZES[8])),
            ],
        }
    }

    fn slab_index(size: usize) -> Option<usize> {
        SLAB_SIZES.iter().position(|&s| s >= size)
    }

    fn page_order(size: usize) -> usize {
        size.div_ceil(PAGE_SIZE).next_power_of_two().trailing_zeros() as usize
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(layout.align());
        match Self::slab_index(size) {
            Some(idx) => self.slabs[idx].lock().alloc().unwrap_or(ptr::null_mut()),
            None => match pmm::alloc(Self::page_order(size)) {
                Some(phys) => phys_to_virt(phys).as_u64() as *mut u8,
                None       => ptr::null_mut(),
            },
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let size = layout.size().max(layout.align());
        match Self::slab_index(size) {
            Some(idx) => self.slabs[idx].lock().free(ptr),
            None => {
                let phys = virt_to_phys(VirtAddr::new(ptr as u64));
                // SAFETY: the block came from pmm::alloc with the same order.
                unsafe { pmm::free(phys, Self::page_order(size)) };
            }
        }
    }
}

#[cfg_attr(target_os = "none", global_allocator)]
static HEAP: KernelHeap = KernelHeap::new();

pub fn init() {
    let ready = HEAP.slabs.iter().filter(|slab| slab.lock().grow()).count();
    log::info!("heap: slab allocator ready ({}/{} caches)", ready, NUM_SLABS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    const TEST_PAGES: usize = 64;

    /// Feed the global PMM with leaked, page-aligned host memory (HHDM = 0).
    fn host_frames() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let layout = Layout::from_size_align(TEST_PAGES * PAGE_SIZE, PAGE_SIZE).unwrap();
            let base = unsafe { std::alloc::alloc(layout) };
            assert!(!base.is_null());
            pmm::init(core::iter::once((base as u64, layout.size() as u64)), 0);
        });
    }

    #[test]
    fn size_classes() {
        assert_eq!(KernelHeap::slab_index(1), Some(0));
        assert_eq!(KernelHeap::slab_index(24), Some(2));
        assert_eq!(KernelHeap::slab_index(2048), Some(8));
        assert_eq!(KernelHeap::slab_index(2049), None);
    }

    #[test]
    fn page_orders() {
        assert_eq!(KernelHeap::page_order(2049), 0);
        assert_eq!(KernelHeap::page_order(4097), 1);
        assert_eq!(KernelHeap::page_order(32 * 1024), 3);
    }

    #[test]
    fn slab_objects_are_reused() {
        host_frames();
        let heap = KernelHeap::new();
        let layout = Layout::from_size_align(40, 8).unwrap();

        unsafe {
            let a = heap.alloc(layout);
            assert!(!a.is_null());
            assert_eq!(a as usize % 64, 0);
            a.write_bytes(0xAB, 40);
            heap.dealloc(a, layout);
            assert_eq!(heap.alloc(layout), a);
        }
    }

    #[test]
    fn stack_sized_blocks_are_page_aligned() {
        host_frames();
        let heap = KernelHeap::new();
        let layout = Layout::from_size_align(32 * 1024, 16).unwrap();

        unsafe {
            let stack = heap.alloc(layout);
            assert!(!stack.is_null());
            assert_eq!(stack as usize % PAGE_SIZE, 0);
            stack.write_bytes(0, 32 * 1024);
            heap.dealloc(stack, layout);
        }
    }
}
