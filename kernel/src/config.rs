//! Конфигурация ядра / Kernel configuration
//!
//! Константы времени сборки и разбор командной строки Limine.
//! Build-time constants and the Limine command-line parser.
//!
//! Command line (space separated, unknown tokens ignored):
//!   loglevel=<off|error|warn|info|debug|trace>
//!   nosmp — only the bootstrap processor is brought up

use core::fmt;
use core::str::FromStr;

use log::LevelFilter;

/// Стек каждого ядра / Per-core stack size.
pub const AP_STACK_SIZE: usize = 32 * 1024;

/// Пауза после публикации дескрипторов AP.
/// Settling delay after publishing AP descriptors.
pub const SETTLE_DELAY_US: u64 = 50_000;

pub const TSC_CALIBRATION_ROUNDS: usize = 4;
pub const TSC_CALIBRATION_US: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub log_level: LevelFilter,
    pub smp: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self { log_level: LevelFilter::Info, smp: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidLogLevel,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLogLevel => f.write_str("loglevel must be one of off, error, warn, info, debug, trace"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

impl BootConfig {
    pub fn parse(cmdline: &str) -> Result<Self> {
        let mut config = Self::default();
        for token in cmdline.split_ascii_whitespace() {
            match token.split_once('=') {
                Some(("loglevel", value)) => {
                    config.log_level = LevelFilter::from_str(value).map_err(|_| Error::InvalidLogLevel)?;
                }
                None if token == "nosmp" => config.smp = false,
                _ => {}
            }
        }
        Ok(config)
    }
}
