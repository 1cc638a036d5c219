//! x86_64 boot entry point for the bootstrap processor
//!
//! Limine jumps here in 64-bit long mode with interrupts disabled and BSS
//! already zeroed. We move onto our own boot stack (so the bootloader's
//! reclaimable memory can be handed to the PMM) and call kernel_main.
//! Secondary cores never pass through here; see `smp::ap_entry`.

use core::arch::global_asm;

global_asm!(
    r#"
.section .text
.global _start
_start:
    cli
    cld

    /* Switch to the 64KB BSP stack */
    leaq bsp_stack_top(%rip), %rsp
    andq $-16, %rsp
    xorl %ebp, %ebp

    callq kernel_main

    /* kernel_main never returns; hang if it does */
.hang:
    cli
    hlt
    jmp .hang

.section .bss
.balign 16
bsp_stack_bottom:
    .skip 65536
bsp_stack_top:
"#,
    options(att_syntax)
);
