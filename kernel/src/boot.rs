//! Limine boot protocol — запросы и ответы / requests and responses
//!
//! Загрузчик заполняет ответы до передачи управления; после этого они
//! только читаются. The bootloader fills the responses before handing over
//! control; afterwards they are read-only.

use alloc::vec::Vec;
use core::fmt;

use limine::memory_map::EntryType;
use limine::mp::Cpu;
use limine::request::{
    ExecutableCmdlineRequest, HhdmRequest, MemoryMapRequest, MpRequest, RequestsEndMarker,
    RequestsStartMarker,
};
use limine::BaseRevision;

use crate::smp::CoreInfo;

#[used]
#[link_section = ".requests_start_marker"]
static REQUESTS_START: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static MP_REQUEST: MpRequest = MpRequest::new();

#[used]
#[link_section = ".requests"]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static CMDLINE_REQUEST: ExecutableCmdlineRequest = ExecutableCmdlineRequest::new();

#[used]
#[link_section = ".requests_end_marker"]
static REQUESTS_END: RequestsEndMarker = RequestsEndMarker::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    UnsupportedRevision,
    /// The bootloader did not answer the named request.
    MissingResponse(&'static str),
    Smp(crate::smp::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedRevision => f.write_str("bootloader does not support our Limine base revision"),
            Self::MissingResponse(name) => write!(f, "no Limine {} response", name),
            Self::Smp(err) => write!(f, "smp: {}", err),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Проверить ревизию протокола.
/// Check the negotiated protocol revision.
pub fn check() -> Result<()> {
    if BASE_REVISION.is_supported() {
        Ok(())
    } else {
        Err(Error::UnsupportedRevision)
    }
}

/// Offset of the higher-half direct map; 0 before the bootloader answered.
pub fn hhdm_offset() -> u64 {
    HHDM_REQUEST.get_response().map_or(0, |r| r.offset())
}

/// Usable physical regions as `(base, length)`.
pub fn usable_memory() -> Result<impl Iterator<Item = (u64, u64)>> {
    let response = MEMORY_MAP_REQUEST
        .get_response()
        .ok_or(Error::MissingResponse("memory map"))?;
    Ok(response
        .entries()
        .iter()
        .filter(|entry| entry.entry_type == EntryType::USABLE)
        .map(|entry| (entry.base, entry.length)))
}

/// Cores reported by the bootloader, plus the raw records their
/// `goto_address` fields live in.
pub fn cores() -> Result<(Vec<CoreInfo>, &'static [&'static Cpu])> {
    let response = MP_REQUEST.get_response().ok_or(Error::MissingResponse("mp"))?;
    let bsp = response.bsp_lapic_id();
    let cpus = response.cpus();
    let info = cpus
        .iter()
        .map(|cpu| CoreInfo { id: cpu.id, lapic_id: cpu.lapic_id, bootstrap: cpu.lapic_id == bsp })
        .collect();
    Ok((info, cpus))
}

/// Kernel command line; empty if none was given.
pub fn cmdline() -> &'static str {
    CMDLINE_REQUEST
        .get_response()
        .and_then(|r| r.cmdline().to_str().ok())
        .unwrap_or("")
}
