//! Shared scaffolding for unit tests.
//!
//! The frame pool is backed by a leaked, page-aligned block of host memory,
//! so the page-table code runs against real bytes exactly as it would on
//! the direct mapping. Tests that observe pool counters run serialised.

use std::sync::{Mutex, Once};

use config::mm::PAGE_SIZE;

use crate::address::PhysAddr;
use crate::frame::init_frame_allocator;

const TEST_FRAMES: usize = 1024;

static INIT: Once = Once::new();
static POOL_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with the frame pool initialized and exclusive.
pub fn with_frame_pool(f: impl FnOnce()) {
    INIT.call_once(|| {
        let bytes = vec![0u8; (TEST_FRAMES + 1) * PAGE_SIZE];
        let base = Vec::leak(bytes).as_mut_ptr() as usize;
        let start = (base + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        // SAFETY: the leaked block lives forever and is used by nothing
        // else.
        unsafe {
            init_frame_allocator(
                PhysAddr::new(start),
                PhysAddr::new(start + TEST_FRAMES * PAGE_SIZE),
            );
        }
    });
    // A panicking test (the fatal-invariant ones) poisons the lock; the
    // data is just (), so the poison can be ignored.
    let _guard = POOL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    f();
}
