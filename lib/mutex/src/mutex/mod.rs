#[cfg(target_arch = "riscv64")]
use riscv::register::sstatus;

pub mod spin_mutex;

pub use spin_mutex::SpinMutex;

pub type SpinLock<T> = SpinMutex<T, Spin>;
pub type SpinNoIrqLock<T> = SpinMutex<T, SpinNoIrq>;

/// Low-level support for a lock: what to do around acquire and release.
pub trait MutexSupport {
    /// Guard data
    type GuardData;
    /// Called before lock() & try_lock()
    fn before_lock() -> Self::GuardData;
    /// Called when the guard is dropped
    fn after_unlock(_: &mut Self::GuardData);
}

/// Plain spinning, interrupts left as they are.
#[derive(Debug)]
pub struct Spin;

impl MutexSupport for Spin {
    type GuardData = ();
    #[inline(always)]
    fn before_lock() -> Self::GuardData {}
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}

/// Saves and disables supervisor interrupts for the lifetime of the guard,
/// restoring the previous state on release.
pub struct SieGuard(#[allow(dead_code)] bool);

impl SieGuard {
    fn new() -> Self {
        #[cfg(target_arch = "riscv64")]
        {
            let sie = sstatus::read().sie();
            unsafe {
                sstatus::clear_sie();
            }
            Self(sie)
        }
        #[cfg(not(target_arch = "riscv64"))]
        Self(false)
    }
}

impl Drop for SieGuard {
    fn drop(&mut self) {
        #[cfg(target_arch = "riscv64")]
        if self.0 {
            unsafe {
                sstatus::set_sie();
            }
        }
    }
}

/// Spinning with supervisor interrupts disabled while the lock is held.
#[derive(Debug)]
pub struct SpinNoIrq;

impl MutexSupport for SpinNoIrq {
    type GuardData = SieGuard;
    #[inline(always)]
    fn before_lock() -> Self::GuardData {
        SieGuard::new()
    }
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}
