//! Trap plumbing: the kernel trap vector, the trampoline entry points for
//! user traps, and the page-fault seam the process layer drives.

use core::arch::global_asm;

use config::mm::{TRAMPOLINE, trampoline_start};
use mm::{address::VirtAddr, vm::AddrSpace};
use riscv::register::{
    mtvec::TrapMode,
    scause, sepc, stval,
    stvec::{self, Stvec},
};
use systype::{SysError, SysResult, memory_flags::MemPerm};

global_asm!(include_str!("kernelvec.S"));
global_asm!(include_str!("trampoline.S"));

/// Exception codes of the page-fault trio in `scause`.
const INSTRUCTION_PAGE_FAULT: usize = 12;
const LOAD_PAGE_FAULT: usize = 13;
const STORE_PAGE_FAULT: usize = 15;

unsafe extern "C" {
    fn kernelvec();
    fn uservec();
    fn userret();
}

/// Installs the kernel trap vector on this hart.
pub fn init() {
    set_trap_handler(kernelvec as usize);
}

fn set_trap_handler(handler_addr: usize) {
    unsafe {
        let mut stvec = Stvec::from_bits(0);
        stvec.set_address(handler_addr);
        stvec.set_trap_mode(TrapMode::Direct);
        stvec::write(stvec);
    }
}

/// Virtual address of `uservec` through the trampoline alias. The process
/// layer points `stvec` here while a process runs in user mode.
pub fn uservec_va() -> usize {
    TRAMPOLINE + (uservec as usize - trampoline_start())
}

/// Virtual address of `userret` through the trampoline alias.
pub fn userret_va() -> usize {
    TRAMPOLINE + (userret as usize - trampoline_start())
}

/// Saved user state, living in the page below the trampoline. The layout
/// is fixed by the offsets in `trampoline.S`.
#[repr(C)]
pub struct TrapFrame {
    pub kernel_satp: usize,   // 0
    pub kernel_sp: usize,     // 8
    pub kernel_trap: usize,   // 16
    pub epc: usize,           // 24
    pub kernel_hartid: usize, // 32
    pub ra: usize,            // 40
    pub sp: usize,            // 48
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub a0: usize, // 112
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize, // 280
}

/// Trap entry for traps taken while in supervisor mode. With interrupts
/// off and nothing running in user mode yet, any such trap is a kernel
/// bug.
#[unsafe(no_mangle)]
pub fn kernel_trap_handler() {
    panic!(
        "kernel trap: scause={:#x} stval={:#x} sepc={:#x}",
        scause::read().bits(),
        stval::read(),
        sepc::read(),
    );
}

/// Maps a page-fault `scause` to the access kind it asked for; `None` for
/// any other trap cause.
pub fn page_fault_access(scause_bits: usize) -> Option<MemPerm> {
    match scause_bits {
        LOAD_PAGE_FAULT => Some(MemPerm::R),
        STORE_PAGE_FAULT => Some(MemPerm::W),
        INSTRUCTION_PAGE_FAULT => Some(MemPerm::X),
        _ => None,
    }
}

/// Resolves a faulting user access against `space`. The process layer
/// calls this from its user-trap path with the raw `scause` and `stval`
/// values of the trap.
pub fn handle_user_page_fault(
    space: &AddrSpace,
    scause_bits: usize,
    fault_addr: usize,
) -> SysResult<()> {
    let access = page_fault_access(scause_bits).ok_or(SysError::EINVAL)?;
    if !VirtAddr::check_validity(fault_addr) {
        return Err(SysError::ENOVMA);
    }
    space.handle_page_fault(VirtAddr::new(fault_addr), access)
}
