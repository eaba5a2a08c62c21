//! Recursive mutex with scoped acquisition.
//!
//! The registry is guarded by a single lock that the owning thread may take
//! again while already holding it (a plugin's `validate` may query the
//! registry during detection).  `parking_lot::ReentrantMutex` only hands out
//! shared references, so the state sits in a `RefCell`; every borrow is kept
//! to a single read or write and never spans a call into plugin code.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;

pub struct RecursiveMutex<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> RecursiveMutex<T> {
    pub fn new(value: T) -> Self {
        Self { inner: ReentrantMutex::new(RefCell::new(value)) }
    }

    /// Block until the lock is held by this thread.  Released when the
    /// returned guard is dropped, on every exit path.
    pub fn lock(&self) -> ScopedLock<'_, T> {
        ScopedLock { guard: self.inner.lock() }
    }
}

impl<T: Default> Default for RecursiveMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII lock guard.
pub struct ScopedLock<'a, T> {
    guard: ReentrantMutexGuard<'a, RefCell<T>>,
}

impl<'a, T> ScopedLock<'a, T> {
    /// Run `f` with shared access and release the borrow before returning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.guard.borrow())
    }

    /// Run `f` with exclusive access and release the borrow before returning.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.guard.borrow_mut())
    }
}
