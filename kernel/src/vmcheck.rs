//! Boot-time self check of the VM core, run once before anything else
//! uses user address spaces.

use config::mm::{KERNEL_START, PAGE_SIZE};
use mm::{
    address::VirtAddr,
    vm::{AddrSpace, VmArea, kernel_phys_addr, uaccess},
};
use systype::memory_flags::MemPerm;

use crate::trap;

pub fn run() {
    log::debug!("vm check: start");

    // The kernel table is a direct map.
    let pa = kernel_phys_addr(VirtAddr::new(KERNEL_START));
    assert_eq!(pa.to_usize(), KERNEL_START);

    log::debug!(
        "vm check: trampoline uservec at {:#x}, userret at {:#x}, trap frame {} bytes",
        trap::uservec_va(),
        trap::userret_va(),
        core::mem::size_of::<trap::TrapFrame>()
    );

    let mut space = AddrSpace::build().expect("vm check: address space");
    space.grow(2 * PAGE_SIZE).expect("vm check: grow");
    space
        .add_area(VmArea::new_anonymous(
            VirtAddr::new(0x1_0000),
            VirtAddr::new(0x1_2000),
            MemPerm::R | MemPerm::W,
        ))
        .expect("vm check: add area");

    // A copy straddling the page boundary of a not-yet-materialised area
    // exercises the whole fault path.
    uaccess::copy_out(&space, 0x1_0ff8, b"boot check").expect("vm check: copy_out");
    let mut back = [0u8; 10];
    uaccess::copy_in(&space, &mut back, 0x1_0ff8).expect("vm check: copy_in");
    assert_eq!(&back, b"boot check");

    // The same resolution, driven the way the trap path would.
    space.shrink(0);
    trap::handle_user_page_fault(&space, 13, 0x1_1800).expect("vm check: fault");

    space.page_table.dump(0, "vmcheck");
    space.free();
    log::debug!("vm check: ok");
}
