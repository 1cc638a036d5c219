//! Ferrox kernel — библиотека ядра / kernel library
//!
//! Всё, что не является точкой входа, живёт здесь, чтобы тестироваться на хосте.
//! Everything except the entry point lives here so it can be tested on the host.
//!
//! Порядок загрузки / Boot order (see `main.rs`):
//!   uart → logger → boot config → pmm/heap → cpu (BSP) → time → smp

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// Box<T>, Vec<T>, Arc<T>
extern crate alloc;

pub mod arch;
pub mod boot;
pub mod config;
pub mod drivers;
pub mod mm;
pub mod smp;
pub mod time;
