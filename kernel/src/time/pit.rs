//! 8254 PIT — однократный отсчёт на канале 2
//! 8254 PIT — one-shot countdown on channel 2
//!
//! Channel 2 is gated through port 0x61 and its output can be polled there,
//! so delays need neither interrupts nor an IRQ handler.

use crate::arch::current::regs::Port;

pub const FREQUENCY_HZ: u64 = 1_193_182;

const CHANNEL2_DATA: u16 = 0x42;
const COMMAND:       u16 = 0x43;
const GATE_PORT:     u16 = 0x61;

const GATE_ENABLE:  u8 = 1 << 0;
const SPEAKER_DATA: u8 = 1 << 1;
const OUT2_STATUS:  u8 = 1 << 5;

/// Channel 2, lobyte/hibyte, mode 0 (interrupt on terminal count), binary.
const CMD_CHANNEL2_ONESHOT: u8 = 0b1011_0000;

const MAX_TICKS: u64 = 0xFFFF;

/// PIT ticks covering at least `us` microseconds.
pub fn ticks_for(us: u64) -> u64 {
    (us * FREQUENCY_HZ).div_ceil(1_000_000)
}

/// Split `ticks` into countdowns the 16-bit counter can hold.
pub fn countdowns(ticks: u64) -> impl Iterator<Item = u16> {
    let full = ticks / MAX_TICKS;
    let rest = ticks % MAX_TICKS;
    core::iter::repeat(MAX_TICKS as u16)
        .take(full as usize)
        .chain((rest > 0).then_some(rest as u16))
}

/// Блокировать минимум `us` микросекунд.
/// Block for at least `us` microseconds.
pub fn sleep_us(us: u64) {
    for count in countdowns(ticks_for(us)) {
        countdown(count);
    }
}

fn countdown(count: u16) {
    let mut gate_port = Port::<u8>::new(GATE_PORT);
    let mut command = Port::<u8>::new(COMMAND);
    let mut data = Port::<u8>::new(CHANNEL2_DATA);
    unsafe {
        // Gate off, speaker off
        let gate = gate_port.read() & !(GATE_ENABLE | SPEAKER_DATA);
        gate_port.write(gate);

        command.write(CMD_CHANNEL2_ONESHOT);
        let [low, high] = count.to_le_bytes();
        data.write(low);
        data.write(high);

        // Rising gate edge starts the count
        gate_port.write(gate | GATE_ENABLE);
        while gate_port.read() & OUT2_STATUS == 0 {
            core::hint::spin_loop();
        }

        gate_port.write(gate);
    }
}
