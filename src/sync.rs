//! Synchronization primitives for worker coordination.
//!
//! - [`event`]: atomic event-flag registers doubling as wake conditions.
//! - [`signal`]: single-fire acknowledgements and the suspend/resume gate.

pub mod event;
pub mod signal;

pub use event::{EventFlags, EventSet};
pub use signal::{AckSignal, SuspendGate, Timeout};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, tolerating poison.
///
/// All state guarded by these locks stays structurally valid across a
/// panicking holder, so a poisoned guard is safe to adopt.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
