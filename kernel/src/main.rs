#![cfg_attr(target_arch = "riscv64", no_std)]
#![cfg_attr(target_arch = "riscv64", no_main)]

#[cfg(target_arch = "riscv64")]
mod entry;
#[cfg(target_arch = "riscv64")]
mod lang_item;
#[cfg(target_arch = "riscv64")]
mod logging;
#[cfg(target_arch = "riscv64")]
mod trap;
#[cfg(target_arch = "riscv64")]
mod vmcheck;

#[cfg(target_arch = "riscv64")]
pub fn rust_main(hart_id: usize) -> ! {
    use config::mm::{RAM_END, kernel_end};
    use mm::address::PhysAddr;

    logger::init();
    log::info!("hart {} booting", hart_id);

    unsafe {
        mm::heap::init_heap_allocator();
        mm::frame::init_frame_allocator(PhysAddr::new(kernel_end()), PhysAddr::new(RAM_END));
        mm::vm::switch_to_kernel_page_table();
    }
    trap::init();
    log::info!("virtual memory on");

    vmcheck::run();
    log::info!("boot complete");

    loop {
        riscv::asm::wfi();
    }
}

#[cfg(not(target_arch = "riscv64"))]
fn main() {
    // The kernel only runs on riscv64; a hosted build has nothing to do.
}
