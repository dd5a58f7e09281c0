//! File backing for memory-mapped areas.
//!
//! The filesystem proper lives outside this repository; it is reached
//! through the [`FsOps`] interface, which the kernel's filesystem crate
//! implements via `crate_interface`. [`InodeFile`] bridges that interface
//! to the page-in path: one call per faulting page, bracketed in a
//! filesystem transaction. Every call may sleep.

use alloc::string::String;

use crate_interface::call_interface;
use mm::vm::BackingFile;
use systype::{SysError, SysResult};

/// Operations the external filesystem provides. Inodes are referred to by
/// opaque handles.
#[crate_interface::def_interface]
pub trait FsOps {
    /// Starts a filesystem transaction on `dev`.
    fn begin_op(dev: u32);
    /// Ends the transaction started by `begin_op`.
    fn end_op(dev: u32);
    /// Resolves `path` to an inode handle.
    fn namei(path: &str) -> Option<usize>;
    /// Locks the inode.
    fn ilock(inode: usize);
    /// Reads `len` bytes at `offset` from the locked inode into the
    /// physical address `dst`. `user_dst` selects a user-space destination;
    /// the page-in path always passes `false`. Returns the number of bytes
    /// read.
    fn read_inode(inode: usize, user_dst: bool, dst: usize, offset: usize, len: usize) -> usize;
    /// Unlocks and releases the inode.
    fn iunlockput(inode: usize);
}

/// A file referred to by path, resolved on every read.
///
/// This is the backing store a memory-mapped file region carries: the
/// fault resolver calls [`BackingFile::read_at`] with the area lock
/// dropped, and the transaction brackets make the read safe against
/// concurrent filesystem activity.
#[derive(Debug)]
pub struct InodeFile {
    dev: u32,
    path: String,
}

impl InodeFile {
    pub fn new(dev: u32, path: String) -> Self {
        Self { dev, path }
    }
}

impl BackingFile for InodeFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> SysResult<usize> {
        call_interface!(FsOps::begin_op(self.dev));
        let Some(inode) = call_interface!(FsOps::namei(&self.path)) else {
            log::warn!("InodeFile::read_at: no inode for {}", self.path);
            call_interface!(FsOps::end_op(self.dev));
            return Err(SysError::ENOFILE);
        };
        call_interface!(FsOps::ilock(inode));
        let read = call_interface!(FsOps::read_inode(
            inode,
            false,
            buf.as_mut_ptr() as usize,
            offset,
            buf.len()
        ));
        call_interface!(FsOps::iunlockput(inode));
        call_interface!(FsOps::end_op(self.dev));
        if read != buf.len() {
            return Err(SysError::ENOFILE);
        }
        Ok(read)
    }
}
