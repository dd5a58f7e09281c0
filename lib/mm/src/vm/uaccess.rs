//! Copying bytes across the user/kernel boundary.
//!
//! These primitives honour demand paging: the destination or source range
//! is resolved through the fault path first, then moved page by page
//! through the level-0 lookup. A lookup that still misses after resolution
//! (for instance a kernel address smuggled in as a user pointer) fails the
//! copy; it never touches memory the user could not.

use core::cmp;

use config::mm::PAGE_SIZE;
use systype::{SysError, SysResult, memory_flags::MemPerm};

use super::addr_space::AddrSpace;
use crate::address::VirtAddr;

/// Copies `src` from the kernel into the user address space at `dst_va`.
///
/// Pages of the destination that were never materialised are resolved as
/// write faults first.
pub fn copy_out(space: &AddrSpace, dst_va: usize, src: &[u8]) -> SysResult<()> {
    space.ensure_range(dst_va, src.len(), MemPerm::W)?;

    let mut src = src;
    let mut dst_va = dst_va;
    while !src.is_empty() {
        let va0 = VirtAddr::new(dst_va).round_down().to_usize();
        let pa = space
            .translate_user(VirtAddr::new(dst_va))
            .ok_or(SysError::EBADPERM)?;
        let n = cmp::min(PAGE_SIZE - (dst_va - va0), src.len());
        // SAFETY: `pa` lies in a user frame resolved above, and `n` stays
        // within that page.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), pa.to_usize() as *mut u8, n);
        }
        src = &src[n..];
        dst_va = va0 + PAGE_SIZE;
    }
    Ok(())
}

/// Copies from the user address space at `src_va` into `dst`.
///
/// Pages of the source that were never materialised are resolved as read
/// faults first.
pub fn copy_in(space: &AddrSpace, dst: &mut [u8], src_va: usize) -> SysResult<()> {
    space.ensure_range(src_va, dst.len(), MemPerm::R)?;

    let mut copied = 0;
    let mut src_va = src_va;
    while copied < dst.len() {
        let va0 = VirtAddr::new(src_va).round_down().to_usize();
        let pa = space
            .translate_user(VirtAddr::new(src_va))
            .ok_or(SysError::EBADPERM)?;
        let n = cmp::min(PAGE_SIZE - (src_va - va0), dst.len() - copied);
        // SAFETY: `pa` lies in a user frame resolved above, and `n` stays
        // within that page.
        unsafe {
            core::ptr::copy_nonoverlapping(
                pa.to_usize() as *const u8,
                dst[copied..].as_mut_ptr(),
                n,
            );
        }
        copied += n;
        src_va = va0 + PAGE_SIZE;
    }
    Ok(())
}

/// Copies a NUL-terminated string from the user address space at `src_va`
/// into `dst`, at most `dst.len()` bytes.
///
/// Pages are resolved one at a time just before they are scanned; the
/// resolver takes the area lock internally, so the caller holds no lock
/// here. Returns the number of bytes copied including the terminating NUL.
///
/// # Errors
/// Fails with [`SysError::EINVAL`] when no NUL shows up within `dst.len()`
/// bytes, besides the resolver's own error codes.
pub fn copy_in_str(space: &AddrSpace, dst: &mut [u8], src_va: usize) -> SysResult<usize> {
    let max = dst.len();
    let mut copied = 0;
    let mut src_va = src_va;
    while copied < max {
        if !VirtAddr::check_validity(src_va) {
            return Err(SysError::ENOVMA);
        }
        let va0 = VirtAddr::new(src_va).round_down();
        space.handle_page_fault(va0, MemPerm::R)?;
        let pa = space
            .translate_user(VirtAddr::new(src_va))
            .ok_or(SysError::EBADPERM)?;
        let in_page = cmp::min(PAGE_SIZE - (src_va - va0.to_usize()), max - copied);
        // SAFETY: the page was resolved above and `in_page` stays inside it.
        let bytes =
            unsafe { core::slice::from_raw_parts(pa.to_usize() as *const u8, in_page) };
        for &b in bytes {
            dst[copied] = b;
            copied += 1;
            if b == 0 {
                return Ok(copied);
            }
        }
        src_va = va0.to_usize() + PAGE_SIZE;
    }
    Err(SysError::EINVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_frame_pool;
    use crate::vm::vm_area::VmArea;

    fn space_with_area(start: usize, end: usize, perm: MemPerm) -> AddrSpace {
        let space = AddrSpace::build().unwrap();
        space
            .add_area(VmArea::new_anonymous(
                VirtAddr::new(start),
                VirtAddr::new(end),
                perm,
            ))
            .unwrap();
        space
    }

    #[test]
    fn copy_out_faults_pages_in() {
        with_frame_pool(|| {
            let space = space_with_area(0, 0x2000, MemPerm::R | MemPerm::W);

            // The write straddles the page boundary of an all-unmapped
            // region: 8 bytes land in the first page, 2 in the second.
            copy_out(&space, 0x0ff8, b"ABCDEFGHIJ").unwrap();

            assert!(space.translate_user(VirtAddr::new(0)).is_some());
            assert!(space.translate_user(VirtAddr::new(0x1000)).is_some());

            let mut back = [0u8; 10];
            copy_in(&space, &mut back, 0x0ff8).unwrap();
            assert_eq!(&back, b"ABCDEFGHIJ");

            space.free();
        });
    }

    #[test]
    fn copy_out_respects_area_permission() {
        with_frame_pool(|| {
            let space = space_with_area(0, 0x1000, MemPerm::R);
            assert_eq!(copy_out(&space, 0, b"x"), Err(SysError::EBADPERM));
            space.free();
        });
    }

    #[test]
    fn copy_without_area_fails() {
        with_frame_pool(|| {
            let space = AddrSpace::build().unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(copy_in(&space, &mut buf, 0x8000), Err(SysError::ENOVMA));
            space.free();
        });
    }

    #[test]
    fn copy_in_str_stops_at_nul() {
        with_frame_pool(|| {
            let space = space_with_area(0x3000, 0x4000, MemPerm::R | MemPerm::W);
            copy_out(&space, 0x3000, b"hi\0garbage").unwrap();

            let mut dst = [0xffu8; 64];
            let n = copy_in_str(&space, &mut dst, 0x3000).unwrap();
            assert_eq!(n, 3);
            assert_eq!(&dst[..3], b"hi\0");
            assert_eq!(dst[3], 0xff);
            space.free();
        });
    }

    #[test]
    fn copy_in_str_crosses_pages() {
        with_frame_pool(|| {
            let space = space_with_area(0, 0x2000, MemPerm::R | MemPerm::W);
            copy_out(&space, 0x0ffe, b"abcd\0").unwrap();

            let mut dst = [0u8; 16];
            let n = copy_in_str(&space, &mut dst, 0x0ffe).unwrap();
            assert_eq!(n, 5);
            assert_eq!(&dst[..5], b"abcd\0");
            space.free();
        });
    }

    #[test]
    fn copy_in_str_without_nul_fails() {
        with_frame_pool(|| {
            let space = space_with_area(0, 0x1000, MemPerm::R | MemPerm::W);
            copy_out(&space, 0, b"abcdefgh").unwrap();
            let mut dst = [0u8; 4];
            assert_eq!(copy_in_str(&space, &mut dst, 0), Err(SysError::EINVAL));
            // The non-string bytes were still copied up to the limit.
            assert_eq!(&dst, b"abcd");
            space.free();
        });
    }

    #[test]
    fn zero_length_copies_succeed() {
        with_frame_pool(|| {
            let space = AddrSpace::build().unwrap();
            copy_out(&space, 0x5000, b"").unwrap();
            let mut empty = [0u8; 0];
            copy_in(&space, &mut empty, 0x5000).unwrap();
            space.free();
        });
    }
}
