//! UART Serial driver — 16550, COM1 (0x3F8)
//!
//! Консоль ядра: все `kprint!` и записи `log` идут сюда.
//! Kernel console: every `kprint!` and `log` record ends up here.
//!
//! Запуск / Run:
//!   qemu-system-x86_64 -serial stdio ...

use core::fmt;
use spin::Mutex;

use crate::arch::current::regs::Port;

pub const COM1: u16 = 0x3F8;

// ── Регистры (смещения от базы) / Registers (offsets from base) ───────────────
const DATA:        u16 = 0; // THR/RBR, или делитель (low) при DLAB=1
const INT_ENABLE:  u16 = 1; // IER, или делитель (high) при DLAB=1
const FIFO_CTRL:   u16 = 2;
const LINE_CTRL:   u16 = 3;
const MODEM_CTRL:  u16 = 4;
const LINE_STATUS: u16 = 5;

const LSR_THR_EMPTY: u8 = 1 << 5;
const LCR_DLAB:      u8 = 1 << 7;

/// Последовательный порт 16550.
/// 16550 serial port.
pub struct Uart {
    base: u16,
}

impl Uart {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    fn port(&self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }

    /// Инициализировать порт на 115200 baud, 8N1.
    /// Initialize the port at 115200 baud, 8N1.
    pub fn init(&mut self) {
        unsafe {
            self.port(INT_ENABLE).write(0x00); // Отключить прерывания / Disable interrupts
            self.port(LINE_CTRL).write(LCR_DLAB);
            self.port(DATA).write(0x01);       // Делитель 1 → 115200 baud
            self.port(INT_ENABLE).write(0x00);
            self.port(LINE_CTRL).write(0x03);  // 8 бит, нет чётности, 1 стоп-бит
            self.port(FIFO_CTRL).write(0xC7);  // Enable FIFO, clear, 14-byte threshold
            self.port(MODEM_CTRL).write(0x0B); // IRQ включён, RTS/DSR
        }
    }

    /// Ждать пока буфер передачи свободен и отправить байт.
    /// Wait for transmit buffer empty and send byte.
    fn send(&mut self, byte: u8) {
        unsafe {
            while self.port(LINE_STATUS).read() & LSR_THR_EMPTY == 0 {
                core::hint::spin_loop();
            }
            self.port(DATA).write(byte);
        }
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send(b'\r');
            }
            self.send(byte);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Uart> = Mutex::new(Uart::new(COM1));

/// Инициализировать консоль.
/// Initialize the console.
pub fn init() {
    CONSOLE.lock().init();
}

/// Внутренняя функция для макроса kprint!
/// Internal function for kprint! macro
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    CONSOLE.lock().write_fmt(args).ok();
}
