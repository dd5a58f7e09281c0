//! Module for the entry point of the kernel.
//!
//! `_start` is the first code to run after the SBI firmware hands over in
//! supervisor mode, with the hart id in `a0`. The kernel is linked at the
//! physical address it is loaded to, so all that happens here is picking a
//! per-hart boot stack and jumping to `rust_main`; paging stays off until
//! the kernel page table is built.

use core::arch::naked_asm;

use config::{device::MAX_HARTS, mm::KERNEL_STACK_SIZE};

use crate::rust_main;

#[repr(C, align(16))]
struct BootStack([u8; KERNEL_STACK_SIZE * MAX_HARTS]);

#[unsafe(link_section = ".bss.stack")]
static mut BOOT_STACK: BootStack = BootStack([0; KERNEL_STACK_SIZE * MAX_HARTS]);

#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.entry")]
unsafe extern "C" fn _start(hart_id: usize) -> ! {
    // `hart_id` arrives in a0 and is passed through to `rust_main`.
    naked_asm!(
        // sp = BOOT_STACK + (hart_id + 1) * KERNEL_STACK_SIZE
        "
        addi    t0, a0, 1
        li      t1, {stack_size}
        mul     t0, t0, t1
        la      sp, {boot_stack}
        add     sp, sp, t0
        call    {rust_main}
    ",
        stack_size = const KERNEL_STACK_SIZE,
        boot_stack = sym BOOT_STACK,
        rust_main = sym rust_main,
    )
}
