//! The in-memory state store: last-committed state per scope key.
//!
//! The store is a derived cache over the durable log. Reads never block on
//! in-flight transactions and always return the last committed value --
//! there are no dirty reads, because [`StateStore::apply`] is called only
//! by the transaction manager's commit path, after the `Prepared` record
//! reached disk.
//!
//! Entries are keyed by [`ScopeKey`] in a [`BTreeMap`] so snapshots and
//! checkpoints iterate in a deterministic order.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use riftstate_types::{ScopeKey, StatePayload, TransactionId, VersionedEntry};

use crate::StoreError;

/// Current committed state for every scope key, with monotonic versions.
///
/// Version numbering starts at 0 on a scope's first commit and increments
/// by exactly 1 per commit; rollbacks never touch it.
#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<BTreeMap<ScopeKey, VersionedEntry>>,
}

impl StateStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Read the last committed payload and version for `scope_key`.
    ///
    /// Returns `None` for a scope that has never committed.
    pub fn read(&self, scope_key: &ScopeKey) -> Option<(StatePayload, u64)> {
        self.entries
            .read()
            .get(scope_key)
            .map(|entry| (entry.state.clone(), entry.version))
    }

    /// The committed version for `scope_key`, if any.
    pub fn version_of(&self, scope_key: &ScopeKey) -> Option<u64> {
        self.entries.read().get(scope_key).map(|entry| entry.version)
    }

    /// Apply a committed payload, incrementing the scope's version.
    ///
    /// Called only by the transaction manager's commit path. Returns the
    /// new version (0 for a first commit).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionOverflow`] if the version counter
    /// would wrap.
    pub fn apply(
        &self,
        scope_key: &ScopeKey,
        payload: StatePayload,
        transaction_id: TransactionId,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.write();
        let next_version = match entries.get(scope_key) {
            Some(existing) => existing.version.checked_add(1).ok_or_else(|| {
                StoreError::VersionOverflow {
                    scope_key: scope_key.clone(),
                }
            })?,
            None => 0,
        };
        entries.insert(
            scope_key.clone(),
            VersionedEntry {
                state: payload,
                version: next_version,
                last_transaction: transaction_id,
                committed_at: Utc::now(),
            },
        );
        debug!(scope = %scope_key, version = next_version, "state applied");
        Ok(next_version)
    }

    /// Put back a begin-time snapshot, undoing an `apply` whose commit
    /// record never reached disk. `None` removes the entry (the scope had
    /// no committed state before).
    pub fn restore_entry(&self, scope_key: &ScopeKey, previous: Option<VersionedEntry>) {
        let mut entries = self.entries.write();
        match previous {
            Some(entry) => {
                entries.insert(scope_key.clone(), entry);
            }
            None => {
                entries.remove(scope_key);
            }
        }
    }

    /// The full entry for `scope_key`, cloned. Used for begin-time
    /// snapshots and revert bookkeeping.
    pub fn entry(&self, scope_key: &ScopeKey) -> Option<VersionedEntry> {
        self.entries.read().get(scope_key).cloned()
    }

    /// Install an entry verbatim during recovery, bypassing version
    /// increment logic (the log dictates the version).
    pub fn install(&self, scope_key: ScopeKey, entry: VersionedEntry) {
        self.entries.write().insert(scope_key, entry);
    }

    /// Explicitly retire a scope, removing its entry. Returns the retired
    /// entry, if any.
    pub fn retire(&self, scope_key: &ScopeKey) -> Option<VersionedEntry> {
        self.entries.write().remove(scope_key)
    }

    /// A deterministic snapshot of every entry, for checkpointing.
    pub fn snapshot(&self) -> Vec<(ScopeKey, VersionedEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Number of scopes with committed state.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no scope has committed state yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
