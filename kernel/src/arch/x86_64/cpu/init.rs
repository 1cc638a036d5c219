//! Per-Core Initialization Sequencer
//!
//! Выполняется ровно один раз на каждом логическом ядре, на его собственном
//! стеке. Runs exactly once on every logical core, on that core's own stack.
//!
//! Шаги строго упорядочены / Steps are strictly ordered:
//!   1. CR0: SSE/SSE2 baseline (EM=0, MP=1)
//!   2. CR4: PGE | OSFXSR | OSXMMEXCPT | TSD in one write
//!   3. SMAP (+ CLAC), 4. SMEP, 5. UMIP, each if present
//!   6. PAT: entries 4–7 ← WP, WC, UC, UC; entries 0–3 untouched
//!   7. XSAVE (re-probed) or FXSAVE

use log::{debug, warn};

use super::features::{detect, Features};
use super::xstate::{ExtendedState, XSAVE_MIN_AREA_SIZE};
use super::Hardware;
use crate::arch::x86_64::regs::{Cr0Flags, Cr4Flags, XCr0Flags, IA32_PAT};

/// Старшие 32 бита PAT: PA4 = WP (0x05), PA5 = WC (0x01), PA6/PA7 = UC.
/// High half of the PAT: PA4 = WP (0x05), PA5 = WC (0x01), PA6/PA7 = UC.
pub const PAT_UPPER: u64 = 0x0000_0105;

const PAT_LOW_MASK: u64 = 0xFFFF_FFFF;

const XSAVE_LEAF: u32 = 0xD;

/// Выполнить последовательность инициализации текущего ядра.
/// Run the initialization sequence on the executing core.
///
/// Returns the extended-state strategy this core computed; publishing it
/// process-wide is the caller's job.
///
/// Calling this twice on the same core is outside its contract: the CR
/// and PAT writes are repeatable, but nothing guarantees the second
/// strategy matches the first.
pub fn init_core<H: Hardware + ?Sized>(hw: &mut H) -> ExtendedState {
    // 1. SSE/SSE2 — baseline для x86_64 / baseline for x86_64
    let cr0 = hw.cr0();
    hw.set_cr0((cr0 - Cr0Flags::EMULATE_COPROCESSOR) | Cr0Flags::MONITOR_COPROCESSOR);

    // 2.
    let cr4 = hw.cr4();
    hw.set_cr4(cr4 | Cr4Flags::PAGE_GLOBAL | Cr4Flags::OSFXSR | Cr4Flags::OSXMMEXCPT_ENABLE | Cr4Flags::TIMESTAMP_DISABLE);

    // 3–5. Защитные механизмы / Protection features
    let caps = detect(&*hw);
    if caps.has(Features::SMAP) {
        let cr4 = hw.cr4();
        hw.set_cr4(cr4 | Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION);
        // Start from a denying state, whatever AC was on entry
        hw.clac();
    }
    if caps.has(Features::SMEP) {
        let cr4 = hw.cr4();
        hw.set_cr4(cr4 | Cr4Flags::SUPERVISOR_MODE_EXECUTION_PROTECTION);
    }
    if caps.has(Features::UMIP) {
        let cr4 = hw.cr4();
        hw.set_cr4(cr4 | Cr4Flags::USER_MODE_INSTRUCTION_PREVENTION);
    }
    debug!("cpu: protection features {:?}", caps.features & (Features::SMAP | Features::SMEP | Features::UMIP));

    // 6. Must precede any mapping that selects PA4/PA5
    let pat = hw.rdmsr(IA32_PAT);
    hw.wrmsr(IA32_PAT, pat_with_upper(pat));

    // 7.
    select_extended_state(hw)
}

/// PAT value with entries 0–3 kept and entries 4–7 replaced.
pub fn pat_with_upper(pat: u64) -> u64 {
    (pat & PAT_LOW_MASK) | (PAT_UPPER << 32)
}

fn select_extended_state<H: Hardware + ?Sized>(hw: &mut H) -> ExtendedState {
    // Re-probe: earlier steps changed CR4
    let caps = detect(&*hw);
    if !caps.has(Features::XSAVE) {
        return ExtendedState::Fxsave;
    }
    // Without leaf 0xD there is no way to size the area
    if hw.cpuid(XSAVE_LEAF, 0).is_none() {
        warn!("cpu: XSAVE advertised but CPUID leaf 0xD is hidden; using FXSAVE");
        return ExtendedState::Fxsave;
    }

    let cr4 = hw.cr4();
    hw.set_cr4(cr4 | Cr4Flags::OSXSAVE);

    let mut mask = XCr0Flags::X87 | XCr0Flags::SSE;
    if caps.has(Features::AVX) {
        mask |= XCr0Flags::AVX;
        // AVX-512 components are only valid in XCR0 together with AVX
        if caps.has(Features::AVX512F) {
            mask |= XCr0Flags::OPMASK | XCr0Flags::ZMM_HI256 | XCr0Flags::HI16_ZMM;
        }
    }
    hw.set_xcr0(mask);

    // Leaf 0xD EBX now reports the size for exactly this mask
    let size = detect(&*hw).xsave_area_size as usize;
    if size < XSAVE_MIN_AREA_SIZE {
        warn!("cpu: CPUID reports a {} byte XSAVE area; using FXSAVE", size);
        let cr4 = hw.cr4();
        hw.set_cr4(cr4 - Cr4Flags::OSXSAVE);
        return ExtendedState::Fxsave;
    }
    ExtendedState::Xsave { mask, size }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86_64::cpu::sim::{Event, SimCpu};
    use proptest::prelude::*;

    fn any_cpu() -> impl Strategy<Value = SimCpu> {
        (
            prop::sample::select(vec![0x1u32, 0x6, 0x7, 0xD, 0x16]),
            any::<[bool; 7]>(),
            any::<u64>(),
            any::<bool>(),
        )
            .prop_map(|(max_leaf, [smep, smap, umip, xsave, avx, avx512f, x2apic], pat, ac)| {
                let mut cpu = SimCpu::bare(max_leaf);
                cpu.smep = smep;
                cpu.smap = smap;
                cpu.umip = umip;
                cpu.xsave = xsave;
                cpu.avx = avx;
                cpu.avx512f = avx512f;
                cpu.x2apic = x2apic;
                cpu.pat = pat;
                cpu.ac = ac;
                cpu
            })
    }

    proptest! {
        #[test]
        fn no_xsave_means_legacy_512(mut cpu in any_cpu()) {
            cpu.xsave = false;

            let state = init_core(&mut cpu);

            prop_assert_eq!(state, ExtendedState::Fxsave);
            prop_assert_eq!(state.area_size(), FXSAVE_SIZE);
            prop_assert!(!cpu.cr4.contains(Cr4Flags::OSXSAVE));
        }

        #[test]
        fn xsave_size_comes_from_hardware(mut cpu in any_cpu()) {
            cpu.xsave = true;
            cpu.max_leaf = cpu.max_leaf.max(0xD);

            let state = init_core(&mut cpu);

            let reported = cpu.cpuid_raw(0xD, 0).ebx as usize;
            prop_assert_eq!(state.area_size(), reported);
            prop_assert_ne!(state.area_size(), FXSAVE_SIZE);
            let enabled = matches!(state, ExtendedState::Xsave { mask, .. } if mask == cpu.xcr0);
            prop_assert!(enabled, "strategy {:?} does not match XCR0 {:?}", state, cpu.xcr0);
        }

        #[test]
        fn hidden_xsave_leaf_means_legacy_512(mut cpu in any_cpu()) {
            cpu.xsave = true;
            cpu.max_leaf = cpu.max_leaf.min(0x7);

            let state = init_core(&mut cpu);

            prop_assert_eq!(state, ExtendedState::Fxsave);
            prop_assert_eq!(state.new_area().len(), FXSAVE_SIZE);
            prop_assert!(!cpu.cr4.contains(Cr4Flags::OSXSAVE));
            prop_assert!(!cpu.events.iter().any(|e| matches!(e, Event::Xcr0(_))));
        }

        #[test]
        fn smap_is_followed_by_clac(cpu in any_cpu()) {
            let mut cpu = cpu;
            let smap = cpu.smap && cpu.max_leaf >= 0x7;

            init_core(&mut cpu);

            if smap {
                prop_assert!(!cpu.ac);
                let enable = cpu
                    .events
                    .iter()
                    .position(|e| matches!(e, Event::Cr4(v) if v.contains(Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION)))
                    .expect("SMAP enabled");
                prop_assert_eq!(&cpu.events[enable + 1], &Event::Clac);
            } else {
                prop_assert!(!cpu.cr4.contains(Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION));
            }
        }

        #[test]
        fn pat_keeps_low_half(cpu in any_cpu()) {
            let mut cpu = cpu;
            let before = cpu.pat;

            init_core(&mut cpu);

            prop_assert_eq!(cpu.pat as u32, before as u32);
            prop_assert_eq!(cpu.pat >> 32, PAT_UPPER);
        }
    }

    const FXSAVE_SIZE: usize = crate::arch::x86_64::cpu::FXSAVE_AREA_SIZE;

    #[test]
    fn baseline_writes_come_first_and_in_order() {
        let mut cpu = SimCpu::legacy();
        cpu.cr0 = Cr0Flags::PROTECTED_MODE_ENABLE | Cr0Flags::EMULATE_COPROCESSOR | Cr0Flags::PAGING;

        init_core(&mut cpu);

        let Event::Cr0(cr0) = cpu.events[0] else { panic!("first write is not CR0: {:?}", cpu.events[0]) };
        assert!(!cr0.contains(Cr0Flags::EMULATE_COPROCESSOR));
        assert!(cr0.contains(Cr0Flags::MONITOR_COPROCESSOR | Cr0Flags::PROTECTED_MODE_ENABLE | Cr0Flags::PAGING));

        let Event::Cr4(cr4) = cpu.events[1] else { panic!("second write is not CR4: {:?}", cpu.events[1]) };
        assert!(cr4.contains(Cr4Flags::PAGE_GLOBAL | Cr4Flags::OSFXSR | Cr4Flags::OSXMMEXCPT_ENABLE | Cr4Flags::TIMESTAMP_DISABLE));
    }

    #[test]
    fn pat_is_written_before_xsave_is_enabled() {
        let mut cpu = SimCpu::modern();

        init_core(&mut cpu);

        let pat = cpu.events.iter().position(|e| matches!(e, Event::Wrmsr(IA32_PAT, _))).unwrap();
        let xcr0 = cpu.events.iter().position(|e| matches!(e, Event::Xcr0(_))).unwrap();
        assert!(pat < xcr0);
    }

    #[test]
    fn avx512_processor_enables_every_vector_component() {
        let mut cpu = SimCpu::modern();
        cpu.avx512f = true;

        let state = init_core(&mut cpu);

        assert_eq!(
            state,
            ExtendedState::Xsave {
                mask: XCr0Flags::X87
                    | XCr0Flags::SSE
                    | XCr0Flags::AVX
                    | XCr0Flags::OPMASK
                    | XCr0Flags::ZMM_HI256
                    | XCr0Flags::HI16_ZMM,
                size: 2688,
            }
        );
    }

    #[test]
    fn avx_without_avx512() {
        let state = init_core(&mut SimCpu::modern());

        assert_eq!(
            state,
            ExtendedState::Xsave { mask: XCr0Flags::X87 | XCr0Flags::SSE | XCr0Flags::AVX, size: 832 }
        );
    }

    #[test]
    fn protection_features_follow_capabilities() {
        let mut cpu = SimCpu::modern();
        cpu.smep = true;
        cpu.umip = false;

        init_core(&mut cpu);

        assert!(cpu.cr4.contains(Cr4Flags::SUPERVISOR_MODE_EXECUTION_PROTECTION));
        assert!(!cpu.cr4.contains(Cr4Flags::USER_MODE_INSTRUCTION_PREVENTION));
    }

    #[test]
    fn capped_cpuid_with_xsave_falls_back_to_fxsave() {
        let mut cpu = SimCpu::modern();
        cpu.max_leaf = 0x7;

        let state = init_core(&mut cpu);

        assert_eq!(state, ExtendedState::Fxsave);
        assert!(state.new_area().len() >= FXSAVE_SIZE);
        // Protection features still come up from leaf 7
        assert!(cpu.cr4.contains(Cr4Flags::SUPERVISOR_MODE_ACCESS_PREVENTION));
    }

    #[test]
    fn second_run_on_the_same_core_rewrites_registers() {
        let mut cpu = SimCpu::modern();

        let first = init_core(&mut cpu);
        let writes = cpu.events.len();
        let pat = cpu.pat;
        let second = init_core(&mut cpu);

        // Out of contract: the sequence runs again instead of being skipped,
        // and the second strategy is whatever the core reports now
        assert_eq!(cpu.events.len(), 2 * writes);
        assert_eq!(cpu.pat, pat);
        assert!(matches!(first, ExtendedState::Xsave { .. }));
        assert!(second.area_size() >= FXSAVE_SIZE);
    }

    #[test]
    fn pat_encoding() {
        // Power-on default: WB, WT, UC-, UC in both halves
        let reset = 0x0007_0406_0007_0406;
        assert_eq!(pat_with_upper(reset), 0x0000_0105_0007_0406);
    }
}
