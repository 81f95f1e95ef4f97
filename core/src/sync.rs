//! Internal lock helpers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquire a mutex, recovering the guard if a panicking holder poisoned it.
///
/// Panics cannot happen inside our critical sections (plain map updates),
/// but the workspace forbids `unwrap`, so poisoning is handled explicitly.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
