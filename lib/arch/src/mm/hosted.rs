//! No-op stand-ins used when the crate is built for a hosted target, where
//! the page-table code runs against plain memory and there is no TLB.

pub fn switch_pagetable(_satp: usize) {}

pub fn fence() {}

pub fn fence_i() {}

pub fn sfence_vma_all() {}

pub fn sfence_vma_addr(_addr: usize) {}
