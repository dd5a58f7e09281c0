use core::arch::asm;

/// Loads `satp` and flushes the hart-local TLB.
pub fn switch_pagetable(satp: usize) {
    unsafe {
        asm!(
            "csrw satp, {}",
            "sfence.vma",
            in(reg) satp
        );
    }
}

pub fn fence() {
    riscv::asm::fence();
}

pub fn fence_i() {
    riscv::asm::fence_i();
}

/// Flushes the whole hart-local TLB.
pub fn sfence_vma_all() {
    riscv::asm::sfence_vma_all();
}

/// Flushes hart-local TLB entries for one virtual address.
pub fn sfence_vma_addr(addr: usize) {
    riscv::asm::sfence_vma(0, addr);
}
