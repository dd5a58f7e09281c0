//! Kernel heap allocator
//!
//! The kernel heap lives in a static region inside the image and is served
//! by the buddy system allocator.

use buddy_system_allocator as buddy;

use config::mm::KERNEL_HEAP_SIZE;

static mut KERNEL_HEAP: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

#[global_allocator]
static HEAP_ALLOCATOR: buddy::LockedHeap<32> = buddy::LockedHeap::empty();

/// Initialize heap allocator
///
/// # Safety
///
/// - This function should be called only once
/// - The caller should ensure that the heap is not used and referenced
///   before this call
pub unsafe fn init_heap_allocator() {
    unsafe {
        #[allow(static_mut_refs)]
        let start_addr = KERNEL_HEAP.as_ptr() as usize;

        HEAP_ALLOCATOR.lock().init(start_addr, KERNEL_HEAP_SIZE);

        log::info!(
            "[kernel] heap initialized: {:#x} - {:#x}",
            start_addr,
            start_addr + KERNEL_HEAP_SIZE
        );
    }
}
