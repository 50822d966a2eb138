//! Per-scope exclusive locks with bounded waits.
//!
//! Exactly one pending transaction may hold the lock for a scope key; all
//! other acquirers block on a condvar until release or until their
//! deadline passes. Locks are deliberately not reentrant: a second
//! acquire for a scope whose lock the same logical caller already holds
//! waits like any other contender, so accidental self-deadlock is loud
//! (a timeout) instead of silent.
//!
//! The controller also supports idle expiry: the engine periodically
//! force-releases locks whose holders have sat on them too long, and
//! force-rolls-back the holders' transactions.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use riftstate_types::{ScopeKey, TransactionId};

use crate::error::EngineError;

/// The holder bookkeeping for one locked scope.
#[derive(Debug, Clone, Copy)]
struct Holder {
    transaction_id: TransactionId,
    acquired_at: Instant,
}

/// Proof of lock ownership, consumed on release.
///
/// The handle pins both the scope and the owning transaction so a stale
/// holder (already force-expired) cannot release a lock re-acquired by
/// someone else.
#[derive(Debug)]
pub struct LockHandle {
    scope_key: ScopeKey,
    transaction_id: TransactionId,
}

impl LockHandle {
    /// The scope this handle locks.
    pub const fn scope_key(&self) -> &ScopeKey {
        &self.scope_key
    }

    /// The transaction holding the lock.
    pub const fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }
}

/// Grants at most one in-flight transaction per scope key.
#[derive(Debug, Default)]
pub struct LockController {
    table: Mutex<BTreeMap<ScopeKey, Holder>>,
    released: Condvar,
}

impl LockController {
    /// Create a controller with no held locks.
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(BTreeMap::new()),
            released: Condvar::new(),
        }
    }

    /// Acquire the lock for `scope_key` on behalf of `owner`, waiting up
    /// to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LockTimeout`] if the lock is still held
    /// when the deadline passes.
    pub fn acquire(
        &self,
        scope_key: &ScopeKey,
        owner: TransactionId,
        timeout: Duration,
    ) -> Result<LockHandle, EngineError> {
        let started = Instant::now();
        let mut table = self.table.lock();
        loop {
            if !table.contains_key(scope_key) {
                table.insert(
                    scope_key.clone(),
                    Holder {
                        transaction_id: owner,
                        acquired_at: Instant::now(),
                    },
                );
                return Ok(LockHandle {
                    scope_key: scope_key.clone(),
                    transaction_id: owner,
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(EngineError::LockTimeout {
                    scope_key: scope_key.clone(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let remaining = timeout.saturating_sub(waited);
            let _ = self.released.wait_for(&mut table, remaining);
        }
    }

    /// Release a held lock. Returns `false` for a stale handle whose
    /// lock was already force-expired.
    pub fn release(&self, handle: &LockHandle) -> bool {
        let mut table = self.table.lock();
        let owns = table
            .get(&handle.scope_key)
            .is_some_and(|holder| holder.transaction_id == handle.transaction_id);
        if owns {
            table.remove(&handle.scope_key);
            self.released.notify_all();
        } else {
            warn!(scope = %handle.scope_key, "stale lock handle release ignored");
        }
        owns
    }

    /// The transaction currently holding `scope_key`, if any.
    pub fn holder_of(&self, scope_key: &ScopeKey) -> Option<TransactionId> {
        self.table
            .lock()
            .get(scope_key)
            .map(|holder| holder.transaction_id)
    }

    /// Force-release every lock held longer than `max_age`.
    ///
    /// Returns the evicted (scope, transaction) pairs so the engine can
    /// force-roll-back the orphaned transactions.
    pub fn expire_idle(&self, max_age: Duration) -> Vec<(ScopeKey, TransactionId)> {
        let mut table = self.table.lock();
        let now = Instant::now();
        let expired: Vec<(ScopeKey, TransactionId)> = table
            .iter()
            .filter(|(_, holder)| now.duration_since(holder.acquired_at) >= max_age)
            .map(|(key, holder)| (key.clone(), holder.transaction_id))
            .collect();
        for (key, transaction_id) in &expired {
            warn!(scope = %key, transaction = %transaction_id, "scope lock force-expired");
            table.remove(key);
        }
        if !expired.is_empty() {
            self.released.notify_all();
        }
        expired
    }

    /// Number of currently held locks.
    pub fn held_count(&self) -> usize {
        self.table.lock().len()
    }
}
