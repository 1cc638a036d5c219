//! Time — блокирующие задержки / blocking delays
//!
//!   pit — 8254 PIT channel 2, используется до калибровки / used before calibration
//!   tsc — TSC, калиброванный по PIT / TSC calibrated against the PIT

pub mod pit;
pub mod tsc;

/// Блокировать минимум `us` микросекунд.
/// Block for at least `us` microseconds.
pub fn sleep_us(us: u64) {
    match tsc::frequency() {
        Some(hz) => tsc::sleep_us(us, hz),
        None => pit::sleep_us(us),
    }
}

/// Калибровать TSC; после этого `sleep_us` не трогает порты PIT.
/// Calibrate the TSC; afterwards `sleep_us` no longer touches the PIT.
pub fn init() {
    let hz = tsc::calibrate();
    log::info!("time: TSC {}.{:03} MHz", hz / 1_000_000, (hz / 1_000) % 1_000);
}
