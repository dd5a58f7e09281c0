//! Module for managing virtual address spaces.
//!
//! An address space pairs a page table with the set of virtual memory
//! areas (VMAs) describing what the user process may touch, plus the size
//! of the linearly grown region at the bottom of the space. The process
//! layer owns one `AddrSpace` per process.
//!
//! Two kinds of memory coexist here. The linear region `[0, size)` is
//! populated eagerly by [`AddrSpace::grow`]. Everything else is populated
//! lazily: an access faults, the resolver finds the covering VMA, takes a
//! frame, optionally fills it from the area's backing file, and installs
//! the leaf entry.
//!
//! The area map is guarded by a spin lock which also serialises fault
//! resolution for the space. The lock is dropped across the backing-file
//! read, which may sleep; after re-acquisition the world may have changed,
//! which is why the resolver treats an already-present leaf as success.

use alloc::collections::btree_map::BTreeMap;

use arch::mm::sfence_vma_addr;
use config::mm::PAGE_SIZE;
use mutex::SpinLock;
use systype::{SysError, SysResult, memory_flags::MemPerm};

use super::{
    page_table::PageTable,
    pte::{PageTableEntry, PteFlags},
    vm_area::VmArea,
};
use crate::{
    address::VirtAddr,
    frame::{alloc_frame, alloc_zeroed_frame, free_frame},
};

/// A virtual address space.
///
/// See the module-level documentation for more information.
#[derive(Debug)]
pub struct AddrSpace {
    /// Page table of the address space.
    pub page_table: PageTable,
    /// Size of the linearly grown region starting at VA 0.
    size: usize,
    /// VMAs of the address space, keyed by starting address.
    vm_areas: SpinLock<BTreeMap<VirtAddr, VmArea>>,
}

impl AddrSpace {
    /// Creates an empty address space.
    ///
    /// # Errors
    /// Returns [`SysError::ENOMEM`] if no frame can be had for the root
    /// page table.
    pub fn build() -> SysResult<Self> {
        Ok(Self {
            page_table: PageTable::build()?,
            size: 0,
            vm_areas: SpinLock::new(BTreeMap::new()),
        })
    }

    /// Size of the linear region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Loads the initial user image into address 0, for the very first
    /// process only. `src` must be smaller than a page.
    ///
    /// # Panics
    /// Panics on exhaustion; the first process is boot-critical.
    pub fn init_first(&mut self, src: &[u8]) {
        assert!(src.len() < PAGE_SIZE, "init_first: more than a page");
        let frame = alloc_zeroed_frame().expect("init_first: out of memory");
        self.page_table
            .map_range(
                VirtAddr::new(0),
                PAGE_SIZE,
                frame.address(),
                PteFlags::from(MemPerm::all()),
            )
            .expect("init_first: map");
        // SAFETY: the frame was just allocated for this mapping.
        unsafe {
            frame.as_slice_mut()[..src.len()].copy_from_slice(src);
        }
        self.size = PAGE_SIZE;
    }

    /// Grows the linear region to `new_size`, allocating zeroed
    /// user-accessible R/W/X pages from `PGROUNDUP(size)` upwards. Returns
    /// the new size; growing to a smaller size is a no-op.
    ///
    /// # Errors
    /// Returns [`SysError::ENOMEM`] when a frame or an intermediate
    /// page-table page cannot be had. Pages installed by the failing call
    /// are unmapped and freed again before it returns.
    pub fn grow(&mut self, new_size: usize) -> SysResult<usize> {
        if new_size <= self.size {
            return Ok(self.size);
        }
        let old_size = self.size;
        let mut a = VirtAddr::new(old_size).round_up().to_usize();
        while a < new_size {
            let Some(frame) = alloc_zeroed_frame() else {
                self.dealloc_range(a, old_size);
                return Err(SysError::ENOMEM);
            };
            if let Err(e) = self.page_table.map_range(
                VirtAddr::new(a),
                PAGE_SIZE,
                frame.address(),
                PteFlags::from(MemPerm::all()),
            ) {
                free_frame(frame);
                self.dealloc_range(a, old_size);
                return Err(e);
            }
            a += PAGE_SIZE;
        }
        self.size = new_size;
        Ok(new_size)
    }

    /// Shrinks the linear region to `new_size`, unmapping and freeing the
    /// pages above it. Returns the new size; shrinking to a larger size is
    /// a no-op.
    pub fn shrink(&mut self, new_size: usize) -> usize {
        if new_size >= self.size {
            return self.size;
        }
        self.dealloc_range(self.size, new_size);
        self.size = new_size;
        new_size
    }

    /// Unmaps the whole pages between `PGROUNDUP(new_size)` and
    /// `PGROUNDUP(old_size)`, returning their frames.
    fn dealloc_range(&self, old_size: usize, new_size: usize) {
        let old_up = VirtAddr::new(old_size).round_up().to_usize();
        let new_up = VirtAddr::new(new_size).round_up().to_usize();
        if new_up < old_up {
            self.page_table
                .unmap_range(VirtAddr::new(new_up), old_up - new_up, true);
        }
    }

    /// Copies the linear region of this space into `child`, which must be
    /// freshly built. Pages that were never materialised here are skipped;
    /// they will fault lazily in the child. Each present page gets its own
    /// frame in the child with identical flag bits and contents.
    ///
    /// The area list is not copied; the process layer pairs this with
    /// [`AddrSpace::inherit_areas`] on fork.
    ///
    /// # Errors
    /// Returns [`SysError::ENOMEM`] on exhaustion. Everything already
    /// installed in `child` by this call is unmapped and freed again.
    pub fn duplicate(&self, child: &mut AddrSpace) -> SysResult<()> {
        let mut va = 0;
        while va < self.size {
            if let Some(entry) = self.page_table.find_entry(VirtAddr::new(va).page_number()) {
                if entry.is_valid() {
                    if let Err(e) = Self::duplicate_page(*entry, child, va) {
                        if va > 0 {
                            child.page_table.unmap_range(VirtAddr::new(0), va, true);
                        }
                        return Err(e);
                    }
                }
            }
            va += PAGE_SIZE;
        }
        child.size = self.size;
        Ok(())
    }

    /// Copies one present page into `child` at `va`.
    fn duplicate_page(entry: PageTableEntry, child: &mut AddrSpace, va: usize) -> SysResult<()> {
        let frame = alloc_frame().ok_or(SysError::ENOMEM)?;
        // SAFETY: the source frame is mapped in this space and the new
        // frame was just allocated.
        unsafe {
            frame.as_slice_mut().copy_from_slice(entry.ppn().as_slice());
        }
        if let Err(e) =
            child
                .page_table
                .map_range(VirtAddr::new(va), PAGE_SIZE, frame.address(), entry.flags())
        {
            free_frame(frame);
            return Err(e);
        }
        Ok(())
    }

    /// Clones the area list into `child`, replacing whatever it had. File
    /// handles are shared, not duplicated.
    pub fn inherit_areas(&self, child: &AddrSpace) {
        let areas = self.vm_areas.lock();
        let mut child_areas = child.vm_areas.lock();
        child_areas.clear();
        for (va, area) in areas.iter() {
            child_areas.insert(*va, area.clone());
        }
    }

    /// Frees every user frame and then the page-table pages themselves,
    /// consuming the space.
    pub fn free(self) {
        if self.size > 0 {
            self.page_table.unmap_range(VirtAddr::new(0), self.size, true);
        }
        {
            let areas = self.vm_areas.lock();
            for area in areas.values() {
                let len = area.end_va().to_usize() - area.start_va().to_usize();
                self.page_table.unmap_range(area.start_va(), len, true);
            }
        }
        self.page_table.free_walk();
    }

    /// Clears the user-access bit on the leaf entry at `va`, turning the
    /// page into a kernel-only guard. Used for the page below the user
    /// stack.
    ///
    /// # Panics
    /// Panics when `va` has no materialised leaf.
    pub fn clear_user_access(&self, va: VirtAddr) {
        let entry = self
            .page_table
            .find_entry(va.page_number())
            .expect("clear_user_access: no entry");
        assert!(entry.is_valid(), "clear_user_access: not mapped");
        entry.set_flags(entry.flags().difference(PteFlags::U));
        sfence_vma_addr(va.round_down().to_usize());
    }

    /// Adds a VMA to the space. The new area must not overlap any
    /// existing one.
    ///
    /// # Errors
    /// Returns [`SysError::EINVAL`] on overlap.
    pub fn add_area(&self, area: VmArea) -> SysResult<()> {
        let mut areas = self.vm_areas.lock();
        if let Some((_, prev)) = areas.range(..=area.start_va()).next_back() {
            if prev.end_va() > area.start_va() {
                log::info!("add_area: {:?} overlaps {:?}", area, prev);
                return Err(SysError::EINVAL);
            }
        }
        if let Some((&next_start, next)) = areas.range(area.start_va()..).next() {
            if next_start < area.end_va() {
                log::info!("add_area: {:?} overlaps {:?}", area, next);
                return Err(SysError::EINVAL);
            }
        }
        areas.insert(area.start_va(), area);
        Ok(())
    }

    /// Resolves one faulting access at `fault_addr`.
    ///
    /// `access` carries exactly one of `R`/`W`/`X`, derived from the
    /// hardware trap cause. The whole resolution runs under the area lock,
    /// except across the backing-file read.
    ///
    /// # Errors
    /// - [`SysError::ENOVMA`]: no area covers the address.
    /// - [`SysError::EBADPERM`]: the area (or the installed leaf) does not
    ///   permit the access.
    /// - [`SysError::ENOMEM`]: no frame available.
    /// - [`SysError::EMAPFAILED`]: the leaf could not be installed.
    /// - [`SysError::ENOFILE`]: the backing-file read failed or came up
    ///   short; the freshly installed page is torn down again.
    pub fn handle_page_fault(&self, fault_addr: VirtAddr, access: MemPerm) -> SysResult<()> {
        let page_va = fault_addr.round_down();
        let vpn = page_va.page_number();

        let areas = self.vm_areas.lock();
        let area = areas
            .range(..=fault_addr)
            .next_back()
            .filter(|(_, area)| area.contains(fault_addr))
            .map(|(_, area)| area)
            .ok_or(SysError::ENOVMA)?;

        if let Some(entry) = self.page_table.find_entry(vpn) {
            if entry.is_valid() {
                // Another fault resolved this page first; check the access
                // against the area instead of remapping.
                if !area.perm().is_empty() && !area.perm().contains(access) {
                    return Err(SysError::EBADPERM);
                }
                if !entry.is_user() {
                    return Err(SysError::EBADPERM);
                }
                return Ok(());
            }
        }

        if !area.perm().contains(access) {
            return Err(SysError::EBADPERM);
        }

        let frame = alloc_zeroed_frame().ok_or(SysError::ENOMEM)?;
        debug_assert_eq!(frame.address().page_offset(), 0);
        let flags = area.leaf_flags();
        let backing = area.backing_slice(page_va);
        if self
            .page_table
            .map_range(page_va, PAGE_SIZE, frame.address(), flags)
            .is_err()
        {
            free_frame(frame);
            return Err(SysError::EMAPFAILED);
        }
        sfence_vma_addr(page_va.to_usize());

        if let Some((file, offset, len)) = backing {
            // The read may sleep in the filesystem, so the area lock is
            // dropped here and re-acquired below.
            drop(areas);
            // SAFETY: the frame is owned by the freshly installed leaf.
            let buf = unsafe { &mut frame.as_slice_mut()[..len] };
            let read = file.read_at(offset, buf);
            let _areas = self.vm_areas.lock();
            match read {
                Ok(n) if n == len => {}
                _ => {
                    self.page_table.unmap_range(page_va, PAGE_SIZE, true);
                    return Err(SysError::ENOFILE);
                }
            }
        }
        Ok(())
    }

    /// Resolves every page covering `[va, va + len)` for `access`, taking
    /// and releasing the area lock per page. On failure the pages resolved
    /// so far stay installed; they are valid mappings and a retry will
    /// find them present.
    pub fn ensure_range(&self, va: usize, len: usize, access: MemPerm) -> SysResult<()> {
        if len == 0 {
            return Ok(());
        }
        let Some(end) = va.checked_add(len) else {
            return Err(SysError::ENOVMA);
        };
        if !VirtAddr::check_validity(va) || !VirtAddr::check_validity(end - 1) {
            return Err(SysError::ENOVMA);
        }
        let mut a = VirtAddr::new(va).round_down().to_usize();
        let sup = VirtAddr::new(end - 1).round_down().to_usize() + PAGE_SIZE;
        while a < sup {
            self.handle_page_fault(VirtAddr::new(a), access)?;
            a += PAGE_SIZE;
        }
        Ok(())
    }

    /// Looks a virtual page up the way the copy primitives do.
    pub fn translate_user(&self, va: VirtAddr) -> Option<crate::address::PhysAddr> {
        self.page_table.translate_user(va)
    }
}
