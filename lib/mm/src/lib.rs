#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod address;
pub mod frame;
#[cfg(target_arch = "riscv64")]
pub mod heap;
pub mod vm;

#[cfg(test)]
mod test_support;
