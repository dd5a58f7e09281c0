//! Module for manipulating page tables and managing memory mappings.
//!
//! A page table is a tree of physical frames: the root page-table page
//! refers to two lower levels of page-table pages, whose leaf entries refer
//! to data frames. `PageTable` identifies a tree by its root frame and
//! provides the walker, the mapping engine, and the recursive teardown.

use arch::mm::{make_satp, sfence_vma_addr, switch_pagetable};
use config::mm::{PAGE_SIZE, PTE_PER_TABLE};
use systype::{SysError, SysResult};

use super::pte::{PageTableEntry, PteFlags};
use crate::{
    address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum},
    frame::{alloc_frame, free_frame},
};

#[cfg(target_arch = "riscv64")]
use lazy_static::lazy_static;
#[cfg(target_arch = "riscv64")]
use systype::memory_flags::MemPerm;

/// A three-level Sv39 page table identified by its root frame.
///
/// Intermediate page-table pages are owned by the tree under the root and
/// are created on demand by the walker; they are returned to the frame pool
/// by [`PageTable::free_walk`] once every leaf has been unmapped. Leaf
/// frames are owned by exactly one page table at a time and are freed by
/// [`PageTable::unmap_range`] when asked to.
#[derive(Debug)]
pub struct PageTable {
    /// Physical page number of the root page table.
    root: PhysPageNum,
}

#[cfg(target_arch = "riscv64")]
lazy_static! {
    /// The kernel page table, built once at boot.
    pub static ref KERNEL_PAGE_TABLE: PageTable = unsafe { PageTable::build_kernel_page_table() };
}

impl PageTable {
    /// Builds a new `PageTable` with an empty root page table.
    ///
    /// # Errors
    /// Returns an [`SysError::ENOMEM`] error if no frame can be had for the
    /// root page.
    pub fn build() -> SysResult<Self> {
        let root = alloc_frame().ok_or(SysError::ENOMEM)?;
        // SAFETY: the frame is newly allocated for the root page table.
        unsafe {
            PageTableMem::new(root).clear();
        }
        Ok(PageTable { root })
    }

    /// Gets the physical page number of the root page table.
    pub fn root(&self) -> PhysPageNum {
        self.root
    }

    /// Returns a mutable reference to the leaf page table entry mapping a
    /// given VPN, creating absent intermediate page-table pages on the way
    /// down. Note that the returned entry may be invalid.
    ///
    /// Intermediate entries are written with `V` alone; an entry with `V`
    /// set and none of R/W/X refers to the next level. The walk never
    /// descends past level 0.
    ///
    /// # Errors
    /// Returns an [`SysError::ENOMEM`] error if an intermediate page is
    /// needed but no frame can be had. Entries created before the failure
    /// stay in place.
    pub fn find_entry_force(&self, vpn: VirtPageNum) -> SysResult<&mut PageTableEntry> {
        let mut ppn = self.root;
        for (i, index) in vpn.indices().into_iter().enumerate().rev() {
            let mut table = unsafe { PageTableMem::new(ppn) };
            let entry = table.get_entry_mut(index);
            if i == 0 {
                return Ok(entry);
            }
            if !entry.is_valid() {
                let frame = alloc_frame().ok_or(SysError::ENOMEM)?;
                // SAFETY: the frame is newly allocated for a page-table page.
                unsafe {
                    PageTableMem::new(frame).clear();
                }
                *entry = PageTableEntry::new(frame, PteFlags::V);
            }
            ppn = entry.ppn();
        }
        unreachable!();
    }

    /// Returns a mutable reference to the leaf page table entry mapping a
    /// given VPN. If any intermediate entry is not present, returns `None`.
    /// Note that the returned entry may be invalid.
    pub fn find_entry(&self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        let mut ppn = self.root;
        for (i, index) in vpn.indices().into_iter().enumerate().rev() {
            let mut table = unsafe { PageTableMem::new(ppn) };
            let entry = table.get_entry_mut(index);
            if i == 0 {
                return Some(entry);
            }
            if !entry.is_valid() {
                return None;
            }
            ppn = entry.ppn();
        }
        unreachable!();
    }

    /// Looks up a virtual address and returns the physical address it maps
    /// to, or `None` if it is not mapped. Can only be used to look up user
    /// pages: the leaf must be valid and user-accessible.
    pub fn translate_user(&self, va: VirtAddr) -> Option<PhysAddr> {
        let entry = self.find_entry(va.page_number())?;
        if !entry.is_valid() || !entry.is_user() {
            return None;
        }
        Some(PhysAddr::new(
            entry.ppn().address().to_usize() + va.page_offset(),
        ))
    }

    /// Creates leaf entries for the pages covering `[va, va + len)`,
    /// referring to physical addresses starting at `pa`. `va` and `len`
    /// need not be page-aligned; `pa` must be. `flags` must carry at least
    /// one of R/W/X.
    ///
    /// # Errors
    /// Returns an [`SysError::ENOMEM`] error if the walker cannot allocate
    /// an intermediate page. Entries installed earlier in the same call
    /// stay in place; rollback belongs to the caller.
    ///
    /// # Panics
    /// Panics if a page in the range is already mapped. Remapping is a
    /// kernel bug, not a runtime condition.
    pub fn map_range(
        &self,
        va: VirtAddr,
        len: usize,
        pa: PhysAddr,
        flags: PteFlags,
    ) -> SysResult<()> {
        assert!(len > 0, "map_range: empty range");
        debug_assert!(
            flags.intersects(PteFlags::R | PteFlags::W | PteFlags::X),
            "map_range: no leaf permission in {:?}",
            flags
        );
        debug_assert_eq!(pa.page_offset(), 0);

        let first = va.round_down().page_number().to_usize();
        let last = VirtAddr::new(va.to_usize() + len - 1)
            .round_down()
            .page_number()
            .to_usize();
        let mut pa = pa.to_usize();
        for vpn in first..=last {
            let entry = self.find_entry_force(VirtPageNum::new(vpn))?;
            assert!(!entry.is_valid(), "map_range: remap");
            *entry = PageTableEntry::new(PhysAddr::new(pa).page_number(), flags | PteFlags::V);
            pa += PAGE_SIZE;
        }
        Ok(())
    }

    /// Removes the leaf mappings for the pages covering `[va, va + len)`,
    /// returning the mapped frames to the pool when `free_frames` is set.
    /// Pages in the range that were never materialised are skipped.
    ///
    /// # Panics
    /// Panics if a level-0 entry in the range is valid but carries none of
    /// R/W/X: a page-table page where a leaf belongs is a kernel bug.
    pub fn unmap_range(&self, va: VirtAddr, len: usize, free_frames: bool) {
        if len == 0 {
            return;
        }
        let first = va.round_down().page_number().to_usize();
        let last = VirtAddr::new(va.to_usize() + len - 1)
            .round_down()
            .page_number()
            .to_usize();
        for vpn in first..=last {
            let vpn = VirtPageNum::new(vpn);
            let Some(entry) = self.find_entry(vpn) else {
                continue;
            };
            if !entry.is_valid() {
                continue;
            }
            assert!(entry.is_leaf(), "unmap_range: not a leaf");
            if free_frames {
                free_frame(entry.ppn());
            }
            *entry = PageTableEntry::default();
            sfence_vma_addr(vpn.address().to_usize());
        }
    }

    /// Recursively frees the page-table pages themselves, consuming the
    /// table. Every leaf mapping must already have been removed.
    ///
    /// # Panics
    /// Panics if a still-valid leaf is encountered anywhere in the tree.
    pub fn free_walk(self) {
        free_walk_page(self.root);
    }

    /// Prints every non-zero entry of the table through the `log` facade,
    /// with its level indices, decoded flags, and the virtual range the
    /// entry covers. Debugging only.
    pub fn dump(&self, pid: usize, cmd: &str) {
        log::debug!(
            "page table of pid={} cmd={} at {:#x}",
            pid,
            cmd,
            self.root.address().to_usize()
        );
        let l2 = unsafe { PageTableMem::new(self.root) };
        for (i2, e2) in l2.as_slice().iter().enumerate() {
            if e2.bits() == 0 {
                continue;
            }
            log::debug!("..{:#x}: {:?}", i2, e2);
            if !e2.is_valid() || e2.is_leaf() {
                continue;
            }
            let l1 = unsafe { PageTableMem::new(e2.ppn()) };
            for (i1, e1) in l1.as_slice().iter().enumerate() {
                if e1.bits() == 0 {
                    continue;
                }
                log::debug!(".. ..{:#x}: {:?}", i1, e1);
                if !e1.is_valid() || e1.is_leaf() {
                    continue;
                }
                let l0 = unsafe { PageTableMem::new(e1.ppn()) };
                for (i0, e0) in l0.as_slice().iter().enumerate() {
                    if e0.bits() == 0 {
                        continue;
                    }
                    let va = (((i2 << 9) | i1) << 9 | i0) << 12;
                    log::debug!(
                        ".. .. ..{:#x}: {:?} va=[{:#x}, {:#x}]",
                        i0,
                        e0,
                        va,
                        va + PAGE_SIZE - 1
                    );
                }
            }
        }
    }
}

/// Recursive teardown of one page-table page and everything below it.
fn free_walk_page(ppn: PhysPageNum) {
    let mut table = unsafe { PageTableMem::new(ppn) };
    for entry in table.as_slice_mut().iter_mut() {
        if entry.is_valid() && !entry.is_leaf() {
            free_walk_page(entry.ppn());
            *entry = PageTableEntry::default();
        } else if entry.is_valid() {
            panic!("free_walk: leaf");
        }
    }
    free_frame(ppn);
}

#[cfg(target_arch = "riscv64")]
impl PageTable {
    /// Constructs the kernel page table: a direct mapping of the device
    /// MMIO regions, the kernel image, and all of physical RAM, plus the
    /// trampoline alias at the top of the address space. None of these
    /// mappings are user-accessible.
    ///
    /// # Safety
    /// This function must be called only once, after the frame pool is up.
    ///
    /// # Panics
    /// Panics if the table cannot be built, which cannot happen with a
    /// freshly initialized frame pool.
    unsafe fn build_kernel_page_table() -> Self {
        use config::{
            device::MMIO_RANGES,
            mm::{KERNEL_START, RAM_END, TRAMPOLINE, text_end, trampoline_start},
        };

        let table = Self::build().expect("build_kernel_page_table: out of memory");

        // Device MMIO, read-write.
        for &(start, len) in MMIO_RANGES {
            table.map_kernel_range(start, len, MemPerm::R | MemPerm::W);
        }

        // Kernel text, executable and read-only.
        table.map_kernel_range(KERNEL_START, text_end() - KERNEL_START, MemPerm::R | MemPerm::X);

        // Kernel data and the physical RAM the frame pool hands out.
        table.map_kernel_range(text_end(), RAM_END - text_end(), MemPerm::R | MemPerm::W);

        // The trampoline for trap entry/exit, aliased at the highest
        // virtual address.
        table
            .map_range(
                VirtAddr::new(TRAMPOLINE),
                PAGE_SIZE,
                PhysAddr::new(trampoline_start()),
                PteFlags::from(MemPerm::R | MemPerm::X) | KERNEL_PTE_EXTRA,
            )
            .expect("build_kernel_page_table: trampoline");

        table
    }

    /// Installs a direct (VA = PA) kernel mapping.
    fn map_kernel_range(&self, pa: usize, len: usize, perm: MemPerm) {
        self.map_range(
            VirtAddr::new(pa),
            len,
            PhysAddr::new(pa),
            PteFlags::from(perm) | KERNEL_PTE_EXTRA,
        )
        .expect("map_kernel_range");
    }
}

/// Extra flag bits for kernel mappings: they are global, and `A`/`D` are
/// pre-set because kernel pages are never swapped out.
#[cfg(target_arch = "riscv64")]
const KERNEL_PTE_EXTRA: PteFlags = PteFlags::A.union(PteFlags::D);

/// Translates a kernel virtual address through the kernel page table.
///
/// # Panics
/// Panics when the address is not mapped there; kernel addresses that miss
/// the kernel table are a kernel bug.
#[cfg(target_arch = "riscv64")]
pub fn kernel_phys_addr(va: VirtAddr) -> PhysAddr {
    let entry = KERNEL_PAGE_TABLE
        .find_entry(va.page_number())
        .expect("kernel_phys_addr: no entry");
    assert!(entry.is_valid(), "kernel_phys_addr: invalid entry");
    PhysAddr::new(entry.ppn().address().to_usize() + va.page_offset())
}

/// A helper struct for manipulating a page-table page in memory.
#[derive(Debug)]
struct PageTableMem {
    /// Physical page number of the page-table page.
    ppn: PhysPageNum,
}

impl PageTableMem {
    /// Constructs a new `PageTableMem` for the given frame.
    ///
    /// # Safety
    /// The frame must hold a page table, and the constructed value must not
    /// be used after that page table is deallocated.
    unsafe fn new(ppn: PhysPageNum) -> Self {
        PageTableMem { ppn }
    }

    fn as_slice(&self) -> &'static [PageTableEntry; PTE_PER_TABLE] {
        // SAFETY: the page `ppn` points to is a valid page table thus
        // allocated, reachable through the direct mapping.
        unsafe { &*(self.ppn.address().to_usize() as *const _) }
    }

    fn as_slice_mut(&mut self) -> &'static mut [PageTableEntry; PTE_PER_TABLE] {
        // SAFETY: the page `ppn` points to is a valid page table thus
        // allocated, reachable through the direct mapping.
        unsafe { &mut *(self.ppn.address().to_usize() as *mut _) }
    }

    /// Gets the entry at the given index mutably.
    fn get_entry_mut(&mut self, index: usize) -> &'static mut PageTableEntry {
        &mut self.as_slice_mut()[index]
    }

    /// Clears the page table.
    fn clear(&mut self) {
        self.as_slice_mut().fill(PageTableEntry::default());
    }
}

/// Switch to the kernel page table.
///
/// # Safety
/// This function must be called after the kernel page table is set up.
#[cfg(target_arch = "riscv64")]
pub unsafe fn switch_to_kernel_page_table() {
    unsafe {
        switch_page_table(&KERNEL_PAGE_TABLE);
    }
}

/// Switches the hardware translation register to the given page table,
/// selecting Sv39 mode, and flushes the hart-local TLB.
///
/// # Safety
/// This function must be called before the current page table is dropped,
/// or the kernel may lose its memory mappings.
pub unsafe fn switch_page_table(page_table: &PageTable) {
    switch_pagetable(make_satp(page_table.root().to_usize()));
    log::trace!(
        "switched to page table at {:#x}",
        page_table.root().to_usize()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{alloc_frame, free_frame_count};
    use crate::test_support::with_frame_pool;
    use systype::memory_flags::MemPerm;

    fn user_rw() -> PteFlags {
        PteFlags::from(MemPerm::R | MemPerm::W | MemPerm::U)
    }

    #[test]
    fn map_then_translate() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            let frame = alloc_frame().unwrap();
            let pa = frame.address();
            table
                .map_range(VirtAddr::new(0x4000), PAGE_SIZE, pa, user_rw())
                .unwrap();

            let got = table.translate_user(VirtAddr::new(0x4123)).unwrap();
            assert_eq!(got.to_usize(), pa.to_usize() + 0x123);
            let entry = table.find_entry(VirtAddr::new(0x4000).page_number()).unwrap();
            assert_eq!(entry.flags(), user_rw() | PteFlags::V);

            table.unmap_range(VirtAddr::new(0x4000), PAGE_SIZE, true);
            table.free_walk();
        });
    }

    #[test]
    fn maps_several_pages() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            let frames = [
                alloc_frame().unwrap(),
                alloc_frame().unwrap(),
                alloc_frame().unwrap(),
            ];
            for (i, frame) in frames.iter().enumerate() {
                table
                    .map_range(
                        VirtAddr::new(0x8000 + i * PAGE_SIZE),
                        PAGE_SIZE,
                        frame.address(),
                        user_rw(),
                    )
                    .unwrap();
            }
            for (i, frame) in frames.iter().enumerate() {
                assert_eq!(
                    table
                        .translate_user(VirtAddr::new(0x8000 + i * PAGE_SIZE))
                        .unwrap()
                        .to_usize(),
                    frame.address().to_usize()
                );
            }
            table.unmap_range(VirtAddr::new(0x8000), 3 * PAGE_SIZE, true);
            table.free_walk();
        });
    }

    #[test]
    fn unmap_clears_translation() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            let f1 = alloc_frame().unwrap();
            let f2 = alloc_frame().unwrap();
            table
                .map_range(VirtAddr::new(0x2000), PAGE_SIZE, f1.address(), user_rw())
                .unwrap();
            table
                .map_range(VirtAddr::new(0x3000), PAGE_SIZE, f2.address(), user_rw())
                .unwrap();
            table.unmap_range(VirtAddr::new(0x2000), 2 * PAGE_SIZE, false);
            assert!(table.translate_user(VirtAddr::new(0x2000)).is_none());
            assert!(table.translate_user(VirtAddr::new(0x3000)).is_none());
            free_frame(f1);
            free_frame(f2);
            table.free_walk();
        });
    }

    #[test]
    fn translate_requires_user_bit() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            let frame = alloc_frame().unwrap();
            table
                .map_range(
                    VirtAddr::new(0x5000),
                    PAGE_SIZE,
                    frame.address(),
                    PteFlags::R | PteFlags::W,
                )
                .unwrap();
            assert!(table.translate_user(VirtAddr::new(0x5000)).is_none());
            table.unmap_range(VirtAddr::new(0x5000), PAGE_SIZE, true);
            table.free_walk();
        });
    }

    #[test]
    fn map_unmap_returns_every_frame() {
        with_frame_pool(|| {
            let before = free_frame_count();
            let table = PageTable::build().unwrap();
            let frame = alloc_frame().unwrap();
            table
                .map_range(VirtAddr::new(0x40_0000), PAGE_SIZE, frame.address(), user_rw())
                .unwrap();
            table.unmap_range(VirtAddr::new(0x40_0000), PAGE_SIZE, true);
            table.free_walk();
            assert_eq!(free_frame_count(), before);
        });
    }

    #[test]
    #[should_panic(expected = "remap")]
    fn remap_panics() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            let f1 = alloc_frame().unwrap();
            let f2 = alloc_frame().unwrap();
            table
                .map_range(VirtAddr::new(0), PAGE_SIZE, f1.address(), user_rw())
                .unwrap();
            table
                .map_range(
                    VirtAddr::new(0),
                    PAGE_SIZE,
                    f2.address(),
                    PteFlags::from(MemPerm::R | MemPerm::U),
                )
                .unwrap();
        });
    }

    #[test]
    #[should_panic(expected = "not a leaf")]
    fn unmap_non_leaf_panics() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            // Force the walker to build intermediates, then forge a V-only
            // entry in the level-0 slot.
            let entry = table
                .find_entry_force(VirtAddr::new(0x6000).page_number())
                .unwrap();
            *entry = PageTableEntry::new(alloc_frame().unwrap(), PteFlags::V);
            table.unmap_range(VirtAddr::new(0x6000), PAGE_SIZE, false);
        });
    }

    #[test]
    #[should_panic(expected = "free_walk: leaf")]
    fn free_walk_with_live_leaf_panics() {
        with_frame_pool(|| {
            let table = PageTable::build().unwrap();
            let frame = alloc_frame().unwrap();
            table
                .map_range(VirtAddr::new(0x1000), PAGE_SIZE, frame.address(), user_rw())
                .unwrap();
            table.free_walk();
        });
    }
}
