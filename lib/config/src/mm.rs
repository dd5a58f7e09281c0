//! Memory layout

/// Start of physical memory
pub const RAM_START: usize = 0x8000_0000;
/// Size of physical memory
pub const RAM_SIZE: usize = 128 * 1024 * 1024;
/// End of physical memory
pub const RAM_END: usize = RAM_START + RAM_SIZE;

/// Start of the kernel image. The first 2 MiB above `RAM_START` belong to
/// the SBI firmware. The kernel is direct-mapped, i.e. VA = PA everywhere
/// in the kernel address space.
pub const KERNEL_START: usize = RAM_START + 0x20_0000;

/// Size of the per-hart kernel stack
pub const KERNEL_STACK_SIZE: usize = 64 * 1024;
/// Size of the kernel heap
pub const KERNEL_HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Page size
pub const PAGE_SIZE: usize = 4096;
/// Width of page offset
pub const PAGE_OFFSET_WIDTH: usize = 12;
/// Width of a physical address in Sv39
pub const PA_WIDTH_SV39: usize = 56;
/// Width of a virtual address in Sv39
pub const VA_WIDTH_SV39: usize = 39;
/// Width of a physical page number in Sv39
pub const PPN_WIDTH_SV39: usize = PA_WIDTH_SV39 - PAGE_OFFSET_WIDTH;
/// Width of a virtual page number in Sv39
pub const VPN_WIDTH_SV39: usize = VA_WIDTH_SV39 - PAGE_OFFSET_WIDTH;
/// Number of entries in one page-table page
pub const PTE_PER_TABLE: usize = PAGE_SIZE / 8;

/// One past the highest usable virtual address. Sv39 sign-extends bit 38
/// upwards, so the low half of the address space ends here.
pub const MAX_VA: usize = 1 << (VA_WIDTH_SV39 - 1);

/// The trampoline page is aliased at the highest page of every address
/// space.
pub const TRAMPOLINE: usize = MAX_VA - PAGE_SIZE;
/// The trap frame sits just below the trampoline in user address spaces.
pub const TRAPFRAME: usize = TRAMPOLINE - PAGE_SIZE;

#[cfg(target_arch = "riscv64")]
unsafe extern "C" {
    fn _etext();
    fn _strampoline();
    fn _ekernel();
}

/// End of the kernel's executable text, from the linker script.
#[cfg(target_arch = "riscv64")]
pub fn text_end() -> usize {
    _etext as usize
}

/// Physical address of the trampoline page, from the linker script.
#[cfg(target_arch = "riscv64")]
pub fn trampoline_start() -> usize {
    _strampoline as usize
}

/// End of the kernel image; physical frames are managed from here up to
/// `RAM_END`.
#[cfg(target_arch = "riscv64")]
pub fn kernel_end() -> usize {
    _ekernel as usize
}
