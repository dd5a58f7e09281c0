#![no_std]

extern crate alloc;

pub mod file;

pub use file::{FsOps, InodeFile};
