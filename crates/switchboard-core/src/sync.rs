//! Synchronization utilities for handling poisoned locks.

use std::sync::{Mutex, MutexGuard};

/// Extension trait for `Mutex` that ignores lock poisoning.
///
/// A poisoned lock only means another thread panicked while holding it; the
/// panic is the interesting failure, so callers here keep going with the data.
pub trait IgnoreLock<T> {
    /// Lock the mutex, recovering the guard if the lock is poisoned.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnoreLock<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
