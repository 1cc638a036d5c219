//! HAL — Hardware Abstraction Layer
//!
//! Выбираем реализацию в зависимости от целевой архитектуры.
//! Select implementation based on target architecture.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64 as current;

#[cfg(not(target_arch = "x86_64"))]
compile_error!("Ferrox currently supports x86_64 only");

/// Инициализация загрузочного процессора — вызывается из kernel_main.
/// Bootstrap processor initialization — called from kernel_main.
///
/// Returns the process-wide extended-state strategy every later
/// context-switch path must use.
pub fn init() -> &'static current::cpu::ExtendedState {
    current::init()
}
