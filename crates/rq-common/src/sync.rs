//! Lock helpers.
//!
//! State guarded by the workspace's mutexes is plain values that stay
//! consistent across a panicking holder, so poisoned locks are recovered
//! and logged instead of propagated.

use std::sync::{LockResult, Mutex, MutexGuard};
use tracing::warn;

/// Unwrap a lock result, recovering the guard if the lock is poisoned.
///
/// `what` names the lock in the warning.
pub fn recover<G>(result: LockResult<G>, what: &str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(lock = what, "Recovered poisoned lock");
        poisoned.into_inner()
    })
}

/// Lock `mutex`, recovering it if a previous holder panicked.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    recover(mutex.lock(), what)
}
