//! Read/write lock with a priority-waiter counter.
//!
//! Long writers (the tick) poll [`InterfaceLock::has_priority_waiters`] and
//! release early so priority readers are not starved.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock guarding every piece of mutable registry state.
#[derive(Debug, Default)]
pub struct InterfaceLock<T> {
    inner: RwLock<T>,
    priority_waiters: AtomicUsize,
}

/// Counts a blocked priority acquisition for as long as it lives.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> InterfaceLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
            priority_waiters: AtomicUsize::new(0),
        }
    }

    /// Shared access without priority.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Exclusive access without priority.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Shared access that asks current writers to yield.
    pub fn read_priority(&self) -> RwLockReadGuard<'_, T> {
        if let Some(guard) = self.inner.try_read() {
            return guard;
        }
        let _waiting = WaiterGuard::new(&self.priority_waiters);
        self.inner.read()
    }

    /// Exclusive access that asks current writers to yield.
    pub fn write_priority(&self) -> RwLockWriteGuard<'_, T> {
        if let Some(guard) = self.inner.try_write() {
            return guard;
        }
        let _waiting = WaiterGuard::new(&self.priority_waiters);
        self.inner.write()
    }

    /// Whether a priority caller is currently blocked.
    pub fn has_priority_waiters(&self) -> bool {
        self.priority_waiters.load(Ordering::SeqCst) > 0
    }

    /// Number of blocked priority callers.
    pub fn priority_waiters(&self) -> usize {
        self.priority_waiters.load(Ordering::SeqCst)
    }
}
