//! Module for page table entries.
//!
//! This module provides the `PageTableEntry` type, which represents a page
//! table entry, along with functions for creating and manipulating page
//! table entries.

use core::fmt::{self, Debug, Formatter};

use bitflags::bitflags;

use config::mm::PPN_WIDTH_SV39;
use systype::memory_flags::MemPerm;

use crate::address::PhysPageNum;

/// Offset of the physical page number in a page table entry. A physical
/// page number is located at bits 10-53 in a page table entry.
const PPN_OFFSET: usize = 10;

bitflags! {
    /// Flags for a page table entry.
    ///
    /// The flags are defined in the RISC-V Sv39 specification as follows:
    ///
    /// - `V`: Valid. When set, the PTE is valid. If one of the R, W, or X
    ///   bits is set, the PTE points to a physical page. Otherwise, the PTE
    ///   points to a next-level page table.
    /// - `R`: Read. If set, the page pointed at by the PTE is readable.
    /// - `W`: Write. If set, the page pointed at by the PTE is writable.
    /// - `X`: Execute. If set, the page pointed at by the PTE is executable.
    /// - `U`: User. If set, the page pointed at by the PTE is accessible in
    ///   user mode.
    /// - `G`: Global. If set, the mapping exists in all address spaces.
    /// - `A`: Accessed. If set, the page has been accessed.
    /// - `D`: Dirty. If set, the page has been written to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

impl From<MemPerm> for PteFlags {
    /// Maps permission bits onto entry flag bits. A user-accessible area
    /// gets `U`; a kernel-only one gets `G` instead.
    fn from(perm: MemPerm) -> Self {
        let mut flags = Self::empty();
        if perm.contains(MemPerm::U) {
            flags |= PteFlags::U;
        } else {
            flags |= PteFlags::G;
        }
        if perm.contains(MemPerm::R) {
            flags |= PteFlags::R;
        }
        if perm.contains(MemPerm::W) {
            flags |= PteFlags::W;
        }
        if perm.contains(MemPerm::X) {
            flags |= PteFlags::X;
        }
        flags
    }
}

/// A page table entry defined in Sv39.
///
/// The lower 8 bits of an entry are flags, bits 10-53 are the physical page
/// number, and the upper 10 bits are reserved for extensions. In our
/// implementation, the upper 10 bits are always zero.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry {
    bits: u64,
}

impl PageTableEntry {
    /// Creates a page table entry from the given physical page number and
    /// flags.
    pub fn new(ppn: PhysPageNum, flags: PteFlags) -> Self {
        PageTableEntry {
            bits: (ppn.to_usize() as u64) << PPN_OFFSET | flags.bits(),
        }
    }

    /// Returns the raw bits of the page table entry.
    pub fn bits(self) -> u64 {
        self.bits
    }

    /// Returns the physical page number in the page table entry.
    pub fn ppn(self) -> PhysPageNum {
        let ppn_mask = (1 << PPN_WIDTH_SV39) - 1;
        let ppn = (self.bits >> PPN_OFFSET) & ppn_mask;
        PhysPageNum::new(ppn as usize)
    }

    /// Returns the flags in the page table entry.
    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.bits)
    }

    /// Sets the physical page number in the page table entry.
    pub fn set_ppn(&mut self, ppn: PhysPageNum) {
        let ppn_mask = ((1 << PPN_WIDTH_SV39) - 1) << PPN_OFFSET;
        self.bits = (self.bits & !ppn_mask) | ((ppn.to_usize() as u64) << PPN_OFFSET);
    }

    /// Sets the flags in the page table entry.
    pub fn set_flags(&mut self, flags: PteFlags) {
        let flags_mask = PteFlags::all().bits();
        self.bits = (self.bits & !flags_mask) | flags.bits();
    }

    /// Returns whether the entry is valid.
    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    /// Returns whether the entry is a leaf, i.e. refers to a data page. A
    /// valid entry with none of R/W/X set refers to a next-level table
    /// instead.
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }

    /// Returns whether the page is accessible in user mode.
    pub fn is_user(self) -> bool {
        self.flags().contains(PteFlags::U)
    }

    /// Returns whether the page is writable.
    pub fn is_writable(self) -> bool {
        self.flags().contains(PteFlags::W)
    }
}

impl Default for PageTableEntry {
    /// Returns a zeroed page table entry which is invalid (unmapped).
    fn default() -> Self {
        PageTableEntry { bits: 0 }
    }
}

impl Debug for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("ppn", &self.ppn())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PhysAddr;

    #[test]
    fn encode_decode() {
        let ppn = PhysAddr::new(0x8765_4000).page_number();
        let entry = PageTableEntry::new(ppn, PteFlags::V | PteFlags::R | PteFlags::U);
        assert_eq!(entry.ppn(), ppn);
        assert_eq!(entry.flags(), PteFlags::V | PteFlags::R | PteFlags::U);
        assert_eq!(entry.ppn().address().to_usize(), 0x8765_4000);
        // The referenced physical address is (PTE >> 10) << 12.
        assert_eq!(entry.bits() >> 10 << 12, 0x8765_4000);
    }

    #[test]
    fn leaf_and_non_leaf() {
        let ppn = PhysAddr::new(0x8000_0000).page_number();
        let non_leaf = PageTableEntry::new(ppn, PteFlags::V);
        assert!(non_leaf.is_valid());
        assert!(!non_leaf.is_leaf());

        let leaf = PageTableEntry::new(ppn, PteFlags::V | PteFlags::X);
        assert!(leaf.is_leaf());

        let empty = PageTableEntry::default();
        assert!(!empty.is_valid());
        assert!(!empty.is_leaf());
    }

    #[test]
    fn perm_conversion() {
        let user = PteFlags::from(MemPerm::R | MemPerm::W | MemPerm::U);
        assert_eq!(user, PteFlags::R | PteFlags::W | PteFlags::U);
        let kernel = PteFlags::from(MemPerm::R | MemPerm::X);
        assert_eq!(kernel, PteFlags::R | PteFlags::X | PteFlags::G);
    }
}
