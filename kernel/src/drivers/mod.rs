//! Kernel-space drivers
//!
//! Минимально необходимые для отладки / Minimum required for bring-up:
//!   - UART/Serial  — консоль ядра (COM1) / kernel console (COM1)
//!   - Logger       — бэкенд `log` поверх UART / `log` backend over the UART

pub mod logger;
pub mod uart;

/// Макрос для вывода в консоль.
/// Console print macro.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::drivers::uart::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    ()           => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
