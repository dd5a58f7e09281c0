//! Module for abstracting memory permissions.

use bitflags::bitflags;

bitflags! {
    /// Memory permission/access type corresponding to the R, W, X, and U
    /// bits in a page table entry.
    ///
    /// The bits of `MemPerm` are a subset of the bits of the Sv39 page
    /// table entry flags, and their bit positions are the same as those in
    /// the entry for easy conversion between them.
    ///
    /// A value also describes the kind of a memory access: exactly one of
    /// `R`, `W`, or `X` is set, matching the hardware trap causes for load,
    /// store, and instruction page faults.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemPerm: u8 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
    }
}
