//! `log` backend over the UART console.
//!
//! Records are printed as `[LEVEL target] message`. Output goes through the
//! same locked writer as `kprint!`, so lines from different cores never
//! interleave mid-line.

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct Logger;

static LOGGER: Logger = Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        super::uart::_print(format_args!("{}\n", Line(record)));
    }

    fn flush(&self) {}
}

/// One formatted log line, without the trailing newline.
struct Line<'a, 'r>(&'a Record<'r>);

impl fmt::Display for Line<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:<5} {}] {}", tag(self.0.level()), self.0.target(), self.0.args())
    }
}

fn tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn  => "WARN",
        Level::Info  => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Установить логгер. Повторный вызов только меняет уровень.
/// Install the logger. Calling again only changes the level.
///
/// Returns `false` if a logger was already installed.
pub fn init(level: LevelFilter) -> bool {
    let installed = match log::set_logger(&LOGGER) {
        Ok(()) => true,
        Err(SetLoggerError { .. }) => false,
    };
    log::set_max_level(level);
    if !installed {
        log::warn!("logger: already installed, level now {}", level);
    }
    installed
}
