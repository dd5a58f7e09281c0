#![no_std]

mod mutex;

pub use mutex::{MutexSupport, SieGuard, Spin, SpinLock, SpinMutex, SpinNoIrq, SpinNoIrqLock};
