//! Local APIC — включение контроллера прерываний ядра
//! Local APIC — bringing a core's interrupt controller online
//!
//! Only what bring-up needs: software-enable the controller with the
//! spurious vector at 0xFF. Timer, IPIs and EOI belong to the interrupt
//! subsystem. x2APIC is preferred when the core supports it, so no MMIO
//! mapping is needed; otherwise the xAPIC page is reached via the HHDM.

use core::ptr;

use log::{debug, warn};

use super::cpu::{detect, BareMetal, Features, Hardware};
use super::regs::{IA32_APIC_BASE, X2APIC_SPURIOUS};
use crate::smp::LocalController;

const BASE_X2APIC_ENABLE: u64 = 1 << 10;
const BASE_GLOBAL_ENABLE: u64 = 1 << 11;
const BASE_ADDR_MASK:     u64 = 0x000F_FFFF_FFFF_F000;

const X2APIC_ID: u32 = 0x802;

// xAPIC MMIO offsets
const XAPIC_ID:       usize = 0x20;
const XAPIC_SPURIOUS: usize = 0xF0;

pub const SPURIOUS_VECTOR: u32 = 0xFF;
const SVR_SOFTWARE_ENABLE: u32 = 1 << 8;

/// Режим доступа к контроллеру.
/// How the controller is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    X2Apic,
    /// Virtual address of the register page.
    XApic { mmio: u64 },
}

/// Globally enable the controller (and x2APIC mode when available).
pub fn enable<H: Hardware + ?Sized>(hw: &mut H, hhdm_offset: u64) -> Mode {
    let caps = detect(&*hw);
    let mut base = hw.rdmsr(IA32_APIC_BASE);

    // x2APIC may only be entered from the enabled xAPIC state
    if base & BASE_GLOBAL_ENABLE == 0 {
        base |= BASE_GLOBAL_ENABLE;
        hw.wrmsr(IA32_APIC_BASE, base);
    }

    if caps.has(Features::X2APIC) {
        if base & BASE_X2APIC_ENABLE == 0 {
            hw.wrmsr(IA32_APIC_BASE, base | BASE_X2APIC_ENABLE);
        }
        Mode::X2Apic
    } else {
        Mode::XApic { mmio: (base & BASE_ADDR_MASK) + hhdm_offset }
    }
}

fn spurious_value() -> u32 {
    SVR_SOFTWARE_ENABLE | SPURIOUS_VECTOR
}

/// Драйвер локального APIC для текущего ядра.
/// Local APIC driver for the executing core.
pub struct LocalApic {
    hhdm_offset: u64,
}

impl LocalApic {
    pub const fn new(hhdm_offset: u64) -> Self {
        Self { hhdm_offset }
    }

    /// Enable the controller and return the hardware APIC ID it reports.
    pub fn bring_up<H: Hardware + ?Sized>(&self, hw: &mut H) -> (Mode, u32) {
        let mode = enable(hw, self.hhdm_offset);
        let id = match mode {
            Mode::X2Apic => {
                hw.wrmsr(X2APIC_SPURIOUS, spurious_value() as u64);
                hw.rdmsr(X2APIC_ID) as u32
            }
            Mode::XApic { mmio } => unsafe {
                // HHDM maps the register page; 32-bit aligned accesses only
                ptr::write_volatile((mmio as usize + XAPIC_SPURIOUS) as *mut u32, spurious_value());
                ptr::read_volatile((mmio as usize + XAPIC_ID) as *const u32) >> 24
            },
        };
        (mode, id)
    }
}

impl LocalController for LocalApic {
    fn bring_online(&self, lapic_id: u32) {
        let (mode, id) = self.bring_up(&mut BareMetal);
        if id != lapic_id {
            warn!("apic: expected id {} but controller reports {}", lapic_id, id);
        }
        debug!("apic: {} online in {:?} mode", id, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86_64::cpu::sim::{Event, SimCpu};

    const DEFAULT_BASE: u64 = 0xFEE0_0000;

    #[test]
    fn x2apic_is_preferred() {
        let mut cpu = SimCpu::modern();
        cpu.msrs.insert(IA32_APIC_BASE, DEFAULT_BASE | BASE_GLOBAL_ENABLE);
        cpu.msrs.insert(X2APIC_ID, 7);

        let (mode, id) = LocalApic::new(0).bring_up(&mut cpu);

        assert_eq!(mode, Mode::X2Apic);
        assert_eq!(id, 7);
        assert_eq!(
            cpu.events,
            [
                Event::Wrmsr(IA32_APIC_BASE, DEFAULT_BASE | BASE_GLOBAL_ENABLE | BASE_X2APIC_ENABLE),
                Event::Wrmsr(X2APIC_SPURIOUS, 0x1FF),
            ]
        );
    }

    #[test]
    fn disabled_controller_is_enabled_before_x2apic() {
        let mut cpu = SimCpu::modern();
        cpu.msrs.insert(IA32_APIC_BASE, DEFAULT_BASE);

        enable(&mut cpu, 0);

        assert_eq!(cpu.events[0], Event::Wrmsr(IA32_APIC_BASE, DEFAULT_BASE | BASE_GLOBAL_ENABLE));
        assert_eq!(
            cpu.events[1],
            Event::Wrmsr(IA32_APIC_BASE, DEFAULT_BASE | BASE_GLOBAL_ENABLE | BASE_X2APIC_ENABLE)
        );
    }

    #[test]
    fn xapic_page_is_reached_through_hhdm() {
        let mut cpu = SimCpu::legacy();
        cpu.msrs.insert(IA32_APIC_BASE, DEFAULT_BASE | BASE_GLOBAL_ENABLE | 0x100);

        let mode = enable(&mut cpu, 0xFFFF_8000_0000_0000);

        assert_eq!(mode, Mode::XApic { mmio: 0xFFFF_8000_FEE0_0000 });
        assert!(cpu.events.is_empty());
    }
}
