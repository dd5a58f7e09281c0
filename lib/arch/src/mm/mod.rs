//! Address-translation control and TLB maintenance.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        mod riscv64;
        pub use riscv64::*;
    } else {
        mod hosted;
        pub use hosted::*;
    }
}

/// Sv39 translation mode in the `MODE` field of `satp`.
const SATP_MODE_SV39: usize = 8 << 60;

/// Composes a `satp` value selecting Sv39 translation through the page
/// table rooted at `root_ppn`.
pub fn make_satp(root_ppn: usize) -> usize {
    SATP_MODE_SV39 | root_ppn
}
