//! Mutual-exclusion primitives shared by every subsystem.
//!
//! `spec.md` §1 treats lock/semaphore primitives as an external
//! collaborator of the core subsystems: the subsystems only need *some*
//! mutual-exclusion type at each named lock tier (file-system lock,
//! per-inode extension lock, frame-table lock, swap lock). `Spinlock<T>`
//! is that type: a thin, named wrapper over [`spin::Mutex`] so call sites
//! read the way spec.md's lock-discipline section describes them, rather
//! than a bare `Mutex`.

use spin::{Mutex, MutexGuard};

/// A lock that busy-waits for the duration of contention.
///
/// Named (rather than a bare type alias visible to callers) so the
/// module-level locks described in `spec.md` §5 — the file-system lock,
/// the frame-table lock, and the swap lock — read as what they are at
/// the call site.
pub struct Spinlock<T> {
    inner: Mutex<T>,
}

pub type SpinlockGuard<'a, T> = MutexGuard<'a, T>;

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.inner.lock()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_exclusion_is_observable_through_the_guard() {
        let lock = Spinlock::new(0u32);
        *lock.lock() += 1;
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 2);
    }
}
