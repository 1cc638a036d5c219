//! TSC — калибровка по PIT / calibration against the PIT

use spin::Once;

use super::pit;
use crate::arch::current::regs::rdtsc;
use crate::config::{TSC_CALIBRATION_ROUNDS, TSC_CALIBRATION_US};

static FREQUENCY: Once<u64> = Once::new();

/// Calibrated TSC frequency in Hz.
pub fn frequency() -> Option<u64> {
    FREQUENCY.get().copied()
}

/// Измерить частоту TSC (несколько раундов, среднее).
/// Measure the TSC frequency over several rounds and average them.
pub fn calibrate() -> u64 {
    *FREQUENCY.call_once(|| {
        let mut samples = [0u64; TSC_CALIBRATION_ROUNDS];
        for sample in samples.iter_mut() {
            let start = rdtsc();
            pit::sleep_us(TSC_CALIBRATION_US);
            *sample = hz_from(rdtsc().wrapping_sub(start), TSC_CALIBRATION_US);
        }
        average(&samples)
    })
}

fn hz_from(cycles: u64, us: u64) -> u64 {
    cycles * 1_000_000 / us
}

fn average(samples: &[u64]) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    samples.iter().sum::<u64>() / samples.len() as u64
}

/// Cycles covering at least `us` microseconds at `hz`.
pub fn cycles_for(us: u64, hz: u64) -> u64 {
    (us as u128 * hz as u128).div_ceil(1_000_000) as u64
}

pub fn sleep_us(us: u64, hz: u64) {
    let start = rdtsc();
    let cycles = cycles_for(us, hz);
    while rdtsc().wrapping_sub(start) < cycles {
        core::hint::spin_loop();
    }
}
