#![no_std]

pub mod device;
pub mod mm;
