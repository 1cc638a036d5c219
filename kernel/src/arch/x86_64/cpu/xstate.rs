//! Extended-State Backend Selector — XSAVE vs FXSAVE
//!
//! Ровно одна стратегия на всё время работы ядра.
//! Exactly one strategy for the whole lifetime of the kernel.
//!
//! The strategy carries its own save-area size, and save areas are only
//! created through it, so a context-switch path cannot pair a strategy
//! with the wrong buffer.

use alloc::boxed::Box;
use alloc::vec;
use core::arch::asm;

use log::warn;
use spin::Once;

use crate::arch::x86_64::regs::XCr0Flags;

/// FXSAVE/FXRSTOR всегда используют 512 байт.
/// FXSAVE/FXRSTOR always use 512 bytes.
pub const FXSAVE_AREA_SIZE: usize = 512;

/// Заголовок XSAVE сразу после legacy-области.
/// XSAVE header, right after the legacy region.
pub const XSAVE_HEADER_SIZE: usize = 64;

/// Smallest area XSAVE can write into: legacy region plus header.
pub const XSAVE_MIN_AREA_SIZE: usize = FXSAVE_AREA_SIZE + XSAVE_HEADER_SIZE;

/// XSAVE requires 64-byte alignment; FXSAVE needs 16.
pub const SAVE_AREA_ALIGN: usize = 64;

// Legacy-region layout shared by FXSAVE and XSAVE
const FCW_OFFSET:        usize = 0;
const MXCSR_OFFSET:      usize = 24;
const XSTATE_BV_OFFSET:  usize = 512;
const FCW_DEFAULT:       u16 = 0x037F;
const MXCSR_DEFAULT:     u32 = 0x1F80;

/// Стратегия сохранения FPU/SIMD состояния.
/// FPU/SIMD state save strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedState {
    /// XSAVE/XRSTOR over the components in `mask`; `size` is reported by
    /// CPUID leaf 0xD for that mask.
    Xsave { mask: XCr0Flags, size: usize },
    /// FXSAVE/FXRSTOR, x87 + SSE only.
    Fxsave,
}

impl ExtendedState {
    /// Minimum save-area size for this strategy.
    pub fn area_size(&self) -> usize {
        match self {
            Self::Xsave { size, .. } => (*size).max(XSAVE_MIN_AREA_SIZE),
            Self::Fxsave => FXSAVE_AREA_SIZE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Xsave { .. } => "xsave",
            Self::Fxsave => "fxsave",
        }
    }

    /// Новая область с начальным состоянием FPU (FCW/MXCSR по умолчанию).
    /// A new area holding the power-on FPU state (default FCW/MXCSR).
    pub fn new_area(&self) -> SaveArea {
        let mut area = SaveArea::zeroed(self.area_size());
        let bytes = area.as_bytes_mut();
        bytes[FCW_OFFSET..FCW_OFFSET + 2].copy_from_slice(&FCW_DEFAULT.to_le_bytes());
        bytes[MXCSR_OFFSET..MXCSR_OFFSET + 4].copy_from_slice(&MXCSR_DEFAULT.to_le_bytes());
        if let Self::Xsave { .. } = self {
            // Load x87 + SSE from the legacy region, everything else from init state
            let bv = (XCr0Flags::X87 | XCr0Flags::SSE).bits();
            bytes[XSTATE_BV_OFFSET..XSTATE_BV_OFFSET + 8].copy_from_slice(&bv.to_le_bytes());
        }
        area
    }

    /// Сохранить состояние текущего ядра в `area`.
    /// Save the executing core's state into `area`.
    ///
    /// Panics if `area` is smaller than [`area_size`](Self::area_size).
    pub fn save(&self, area: &mut SaveArea) {
        self.check(area);
        let ptr = area.as_bytes_mut().as_mut_ptr();
        unsafe {
            match self {
                Self::Xsave { mask, .. } => {
                    let bits = mask.bits();
                    asm!("xsave64 [{}]", in(reg) ptr,
                         in("eax") bits as u32, in("edx") (bits >> 32) as u32,
                         options(nostack, preserves_flags));
                }
                Self::Fxsave => {
                    asm!("fxsave64 [{}]", in(reg) ptr, options(nostack, preserves_flags));
                }
            }
        }
    }

    /// Восстановить состояние из `area`.
    /// Restore the executing core's state from `area`.
    ///
    /// Panics if `area` is smaller than [`area_size`](Self::area_size).
    pub fn restore(&self, area: &SaveArea) {
        self.check(area);
        let ptr = area.as_bytes().as_ptr();
        unsafe {
            match self {
                Self::Xsave { mask, .. } => {
                    let bits = mask.bits();
                    asm!("xrstor64 [{}]", in(reg) ptr,
                         in("eax") bits as u32, in("edx") (bits >> 32) as u32,
                         options(nostack, preserves_flags, readonly));
                }
                Self::Fxsave => {
                    asm!("fxrstor64 [{}]", in(reg) ptr, options(nostack, preserves_flags, readonly));
                }
            }
        }
    }

    fn check(&self, area: &SaveArea) {
        assert!(
            area.len() >= self.area_size(),
            "save area too small for {}: {} < {}",
            self.name(), area.len(), self.area_size()
        );
    }
}

// ── Область сохранения / Save area ───────────────────────────────────────────

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Line([u8; SAVE_AREA_ALIGN]);

/// Буфер в куче, выровненный на 64 байта.
/// Heap buffer, 64-byte aligned.
pub struct SaveArea {
    lines: Box<[Line]>,
}

impl SaveArea {
    fn zeroed(size: usize) -> Self {
        let count = size.div_ceil(SAVE_AREA_ALIGN);
        Self { lines: vec![Line([0; SAVE_AREA_ALIGN]); count].into_boxed_slice() }
    }

    /// Size in bytes, rounded up to a multiple of 64.
    pub fn len(&self) -> usize {
        self.lines.len() * SAVE_AREA_ALIGN
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // Line is repr(C) over a byte array: no padding
        unsafe { core::slice::from_raw_parts(self.lines.as_ptr().cast::<u8>(), self.len()) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        unsafe { core::slice::from_raw_parts_mut(self.lines.as_mut_ptr().cast::<u8>(), len) }
    }
}

// ── Публикация / Publication ─────────────────────────────────────────────────

pub(crate) static EXTENDED_STATE: Once<ExtendedState> = Once::new();

/// Зафиксировать стратегию (первый вызов выигрывает).
/// Fix the process-wide strategy; the first caller wins.
pub fn install(state: ExtendedState) -> &'static ExtendedState {
    publish(&EXTENDED_STATE, state)
}

/// Write-once publication into `cell`.
///
/// A later core that computed something different keeps running on the
/// published value; the mismatch is logged because it means heterogeneous
/// core revisions.
pub fn publish(cell: &Once<ExtendedState>, state: ExtendedState) -> &ExtendedState {
    let mut fresh = false;
    let published = cell.call_once(|| {
        fresh = true;
        state
    });
    if !fresh && *published != state {
        warn!(
            "cpu: core computed {:?} but {:?} is already published; keeping the published strategy",
            state, published
        );
    }
    published
}
