//! Kernel error codes.

/// Type alias for result of general functions.
pub type SysResult<T> = Result<T, SysError>;

/// Error codes surfaced by the virtual-memory core.
///
/// The demand-paging resolver reports exactly one of `ENOVMA`, `EBADPERM`,
/// `ENOMEM`, `EMAPFAILED`, or `ENOFILE`; the system-call layer translates
/// them into user-visible errors or kills the offending process. Kernel
/// invariant violations are not error codes; those panic at the site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// No virtual memory area covers the faulting address
    ENOVMA = 1,
    /// The access kind is not permitted by the covering memory area
    EBADPERM = 2,
    /// Out of physical frames
    ENOMEM = 3,
    /// Installing the leaf mapping failed
    EMAPFAILED = 4,
    /// Reading the backing file failed
    ENOFILE = 5,
    /// Invalid argument
    EINVAL = 6,
}

impl SysError {
    /// The numeric code handed to the system-call layer.
    pub fn code(self) -> i32 {
        self as i32
    }
}
