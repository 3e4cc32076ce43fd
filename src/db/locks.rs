//! Non-blocking row locks for plan claims.
//!
//! SQLite only locks whole databases, so "skip rows already locked by another
//! transaction" is provided here: a claim attempt takes the plan's row lock with
//! [`ClaimLocks::try_acquire`] and gets `None` back if another claim is in flight.
//! Nothing ever waits on one of these locks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default, Clone)]
pub struct ClaimLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ClaimLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `key` unless someone else holds it. The lock is released when the guard drops.
    pub fn try_acquire(&self, key: &str) -> Option<ClaimGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(ClaimGuard {
            held: Arc::clone(&self.held),
            key: key.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct ClaimGuard {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
