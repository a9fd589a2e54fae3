//! Critical sections
//!
//! Each kernel object keeps its mutable state in a [`CpuLockCell`]. The lock
//! is only ever held for a bounded number of steps and never across a
//! callback or a suspension, so interrupt handlers can take it too.
use core::fmt;

pub(crate) type CpuLockGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Cell type whose contents can only be accessed inside a critical section.
pub(crate) struct CpuLockCell<T: ?Sized>(spin::Mutex<T>);

impl<T> CpuLockCell<T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(spin::Mutex::new(x))
    }
}

impl<T: ?Sized> CpuLockCell<T> {
    /// Enter a critical section.
    #[inline]
    pub(crate) fn lock(&self) -> CpuLockGuard<'_, T> {
        self.0.lock()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for CpuLockCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // A cell that is already locked (e.g., by the caller) can't be read
        if let Some(inner) = self.0.try_lock() {
            f.write_str("CpuLockCell(")?;
            (*inner).fmt(f)?;
            f.write_str(")")
        } else {
            f.write_str("CpuLockCell(< locked >)")
        }
    }
}
