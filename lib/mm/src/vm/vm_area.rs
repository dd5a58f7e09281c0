//! Module for managing virtual memory areas.
//!
//! A virtual memory area (VMA) is a contiguous region of virtual memory in
//! an address space whose pages share a set of attributes, such as
//! permissions and mapping type. Physical frames for a VMA are materialised
//! lazily: the first faulting access allocates a frame, and a file-backed
//! area additionally fills it from its backing store.
//!
//! The VMAs of one address space are disjoint. They are kept in the
//! address space's area map and consulted by the fault resolver under the
//! area lock.

use alloc::sync::Arc;
use core::fmt::Debug;

use config::mm::PAGE_SIZE;
use systype::{SysResult, memory_flags::MemPerm};

use super::pte::PteFlags;
use crate::address::VirtAddr;

/// Backing store of a file-backed VMA.
///
/// `read_at` may sleep in the filesystem, so no spin lock may be held
/// across a call.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset` into `buf`,
    /// returning the number of bytes read.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> SysResult<usize>;
}

/// A virtual memory area (VMA).
#[derive(Clone)]
pub struct VmArea {
    /// Starting virtual address.
    start: VirtAddr,
    /// Ending virtual address (exclusive).
    end: VirtAddr,
    /// Permission of the area; `U` is implied for every VMA-backed page.
    perm: MemPerm,
    /// Unique data of a specific type of VMA.
    map_type: TypedArea,
}

/// Unique data of a specific type of VMA. This enum is used in [`VmArea`].
#[derive(Clone)]
pub enum TypedArea {
    /// An anonymous VMA, not backed by any file. A user heap or stack is
    /// an anonymous VMA; its pages stay zero-filled until written.
    Anonymous,
    /// A file-backed VMA, used for memory-mapped files.
    FileBacked(FileBackedArea),
}

/// Unique data of a file-backed VMA.
#[derive(Clone)]
pub struct FileBackedArea {
    /// The backing store.
    file: Arc<dyn BackingFile>,
    /// Offset in the file where the mapped bytes start.
    offset: usize,
    /// Number of file bytes backing the area from `offset`. Pages past
    /// this range stay zero-filled.
    len: usize,
}

impl VmArea {
    /// Constructs an anonymous area over `[start_va, end_va)`.
    ///
    /// Both addresses must be page-aligned. `perm` carries the R/W/X bits.
    pub fn new_anonymous(start_va: VirtAddr, end_va: VirtAddr, perm: MemPerm) -> Self {
        debug_assert_eq!(start_va.page_offset(), 0);
        debug_assert_eq!(end_va.page_offset(), 0);
        Self {
            start: start_va,
            end: end_va,
            perm,
            map_type: TypedArea::Anonymous,
        }
    }

    /// Constructs a file-backed area over `[start_va, end_va)`, backed by
    /// `len` bytes of `file` starting at `offset`.
    pub fn new_file_backed(
        start_va: VirtAddr,
        end_va: VirtAddr,
        perm: MemPerm,
        file: Arc<dyn BackingFile>,
        offset: usize,
        len: usize,
    ) -> Self {
        debug_assert_eq!(start_va.page_offset(), 0);
        debug_assert_eq!(end_va.page_offset(), 0);
        Self {
            start: start_va,
            end: end_va,
            perm,
            map_type: TypedArea::FileBacked(FileBackedArea { file, offset, len }),
        }
    }

    /// Whether `va` lies inside the area.
    pub fn contains(&self, va: VirtAddr) -> bool {
        va >= self.start && va < self.end
    }

    /// Returns the starting virtual address of the area.
    pub fn start_va(&self) -> VirtAddr {
        self.start
    }

    /// Returns the ending virtual address of the area.
    pub fn end_va(&self) -> VirtAddr {
        self.end
    }

    /// Returns the permission of the area.
    pub fn perm(&self) -> MemPerm {
        self.perm
    }

    /// Flags for a leaf entry materialised in this area: always `U`, plus
    /// the area's R/W/X bits.
    pub fn leaf_flags(&self) -> PteFlags {
        PteFlags::from(self.perm | MemPerm::U)
    }

    /// What must be read to populate the page at `page_va`: the backing
    /// file and the file-relative offset and length. `None` when the area
    /// is anonymous, or when the page lies entirely past the backed range
    /// and therefore stays zero-filled.
    pub(crate) fn backing_slice(
        &self,
        page_va: VirtAddr,
    ) -> Option<(Arc<dyn BackingFile>, usize, usize)> {
        debug_assert_eq!(page_va.page_offset(), 0);
        let TypedArea::FileBacked(ref backed) = self.map_type else {
            return None;
        };
        let file_start = backed.offset + (page_va.to_usize() - self.start.to_usize());
        if file_start >= backed.offset + backed.len {
            return None;
        }
        let n = usize::min(PAGE_SIZE, backed.offset + backed.len - file_start);
        Some((Arc::clone(&backed.file), file_start, n))
    }
}

impl Debug for VmArea {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self.map_type {
            TypedArea::Anonymous => "anonymous",
            TypedArea::FileBacked(_) => "file-backed",
        };
        f.debug_struct("VmArea")
            .field("start_va", &self.start)
            .field("end_va", &self.end)
            .field("perm", &self.perm)
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFile;

    impl BackingFile for NullFile {
        fn read_at(&self, _offset: usize, _buf: &mut [u8]) -> SysResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn containment() {
        let area = VmArea::new_anonymous(VirtAddr::new(0x4000), VirtAddr::new(0x6000), MemPerm::R);
        assert!(area.contains(VirtAddr::new(0x4000)));
        assert!(area.contains(VirtAddr::new(0x5fff)));
        assert!(!area.contains(VirtAddr::new(0x6000)));
        assert!(!area.contains(VirtAddr::new(0x3fff)));
    }

    #[test]
    fn leaf_flags_always_user() {
        let area = VmArea::new_anonymous(
            VirtAddr::new(0),
            VirtAddr::new(0x1000),
            MemPerm::R | MemPerm::W,
        );
        assert_eq!(area.leaf_flags(), PteFlags::R | PteFlags::W | PteFlags::U);
    }

    #[test]
    fn backing_slice_ranges() {
        let file: Arc<dyn BackingFile> = Arc::new(NullFile);
        // Eight bytes of file back a two-page area.
        let area = VmArea::new_file_backed(
            VirtAddr::new(0x4000),
            VirtAddr::new(0x6000),
            MemPerm::R,
            file,
            0x100,
            8,
        );

        let (_, off, len) = area.backing_slice(VirtAddr::new(0x4000)).unwrap();
        assert_eq!(off, 0x100);
        assert_eq!(len, 8);
        // The second page lies entirely past end-of-file.
        assert!(area.backing_slice(VirtAddr::new(0x5000)).is_none());
    }

    #[test]
    fn backing_slice_clamps_to_page() {
        let file: Arc<dyn BackingFile> = Arc::new(NullFile);
        let area = VmArea::new_file_backed(
            VirtAddr::new(0),
            VirtAddr::new(0x3000),
            MemPerm::R,
            file,
            0,
            PAGE_SIZE + 100,
        );
        let (_, off, len) = area.backing_slice(VirtAddr::new(0)).unwrap();
        assert_eq!((off, len), (0, PAGE_SIZE));
        let (_, off, len) = area.backing_slice(VirtAddr::new(0x1000)).unwrap();
        assert_eq!((off, len), (PAGE_SIZE, 100));
    }

    #[test]
    fn anonymous_has_no_backing() {
        let area = VmArea::new_anonymous(VirtAddr::new(0), VirtAddr::new(0x1000), MemPerm::R);
        assert!(area.backing_slice(VirtAddr::new(0)).is_none());
    }
}
