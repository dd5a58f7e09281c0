//! Module for managing allocatable frames (physical pages).
//!
//! An "allocatable frame" is a frame that is not part of the kernel image.
//! Frames are handed out by physical page number; a leaf frame is owned by
//! exactly one page table at a time, and the mapping code returns it here
//! when the mapping is torn down.
//!
//! The pool is a bitmap over the managed range, protected by a lock so it
//! can be used from every hart.

use bitmap_allocator::{BitAlloc, BitAlloc64K};

use config::mm::PAGE_SIZE;
use mutex::SpinNoIrqLock;

use crate::address::{PhysAddr, PhysPageNum};

/// Global frame pool.
static FRAME_POOL: SpinNoIrqLock<FramePool> = SpinNoIrqLock::new(FramePool {
    bitmap: BitAlloc64K::DEFAULT,
    offset: 0,
    free: 0,
});

struct FramePool {
    /// Bitmap allocator.
    bitmap: BitAlloc64K,
    /// Offset between PPNs and bit indices.
    offset: usize,
    /// Number of frames currently free.
    free: usize,
}

/// Initializes the frame pool over `[start, end)`. Both addresses must be
/// page-aligned.
///
/// # Safety
/// This function must be called only once, and the given range must be
/// unused memory.
pub unsafe fn init_frame_allocator(start: PhysAddr, end: PhysAddr) {
    debug_assert_eq!(start.page_offset(), 0);
    debug_assert_eq!(end.page_offset(), 0);
    let start_ppn = start.page_number().to_usize();
    let end_ppn = end.page_number().to_usize();
    let count = end_ppn - start_ppn;

    let mut pool = FRAME_POOL.lock();
    pool.offset = start_ppn;
    pool.free = count;
    pool.bitmap.insert(0..count);
    log::debug!(
        "frame pool: {:#x} - {:#x} ({} frames)",
        start.to_usize(),
        end.to_usize(),
        count
    );
}

/// Allocates one frame. The contents are whatever the previous owner left
/// there; callers that need a fresh page use [`alloc_zeroed_frame`].
pub fn alloc_frame() -> Option<PhysPageNum> {
    let mut pool = FRAME_POOL.lock();
    match pool.bitmap.alloc() {
        Some(i) => {
            pool.free -= 1;
            Some(PhysPageNum::new(pool.offset + i))
        }
        None => {
            log::warn!("frame pool exhausted");
            None
        }
    }
}

/// Allocates one frame filled with zeros.
pub fn alloc_zeroed_frame() -> Option<PhysPageNum> {
    let ppn = alloc_frame()?;
    // SAFETY: the frame was just allocated and has no other user.
    unsafe {
        ppn.as_slice_mut().fill(0);
    }
    Some(ppn)
}

/// Returns a frame to the pool.
pub fn free_frame(ppn: PhysPageNum) {
    let mut pool = FRAME_POOL.lock();
    let i = ppn.to_usize() - pool.offset;
    pool.bitmap.dealloc(i);
    pool.free += 1;
}

/// Number of frames currently free in the pool.
pub fn free_frame_count() -> usize {
    FRAME_POOL.lock().free
}

// BitAlloc64K manages up to 64Ki frames, i.e. 256 MiB of 4 KiB pages.
const _: () = assert!(config::mm::RAM_SIZE / PAGE_SIZE <= 64 * 1024);
