//! Shared success/failure accounting for one copy run.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::Key;

/// One key whose write failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub key: Key,
    pub cause: String,
}

impl CopyFailure {
    pub fn new(key: Key, cause: impl fmt::Display) -> Self {
        Self {
            key,
            cause: cause.to_string(),
        }
    }
}

impl fmt::Display for CopyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "copying {}: {}", self.key, self.cause)
    }
}

/// Final state read once after every task has joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    pub copied: u64,
    /// In completion order.
    pub failures: Vec<CopyFailure>,
}

impl TallySnapshot {
    pub fn total(&self) -> u64 {
        self.copied + self.failures.len() as u64
    }
}

/// Counter and failure list behind one lock, so no increment or append can
/// be lost between concurrent tasks.
#[derive(Debug, Default)]
pub struct CopyTally {
    state: Mutex<TallySnapshot>,
}

impl CopyTally {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking task cannot leave the counters half-updated, so a poisoned
    // lock still holds accurate data.
    fn lock(&self) -> MutexGuard<'_, TallySnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one copied key. `observe` runs with the new total while the lock
    /// is still held.
    pub fn record_success(&self, observe: impl FnOnce(u64)) {
        let mut state = self.lock();
        state.copied += 1;
        observe(state.copied);
    }

    pub fn record_failure(&self, failure: CopyFailure) {
        self.lock().failures.push(failure);
    }

    pub fn copied(&self) -> u64 {
        self.lock().copied
    }

    pub fn failed(&self) -> usize {
        self.lock().failures.len()
    }

    pub fn snapshot(&self) -> TallySnapshot {
        self.lock().clone()
    }
}
