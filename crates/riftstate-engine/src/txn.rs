//! The transaction manager: begin → validate → log → apply / rollback.
//!
//! All mutation of the state store and world metrics funnels through this
//! type. The commit discipline is strict write-ahead:
//!
//! 1. Validate the payload and the optimistic version check.
//! 2. Append a `Prepared` record and fsync it.
//! 3. Apply the new state to the store and the declared metric deltas.
//! 4. Append a `Committed` record and fsync it.
//!
//! A failure at step 2 rolls the transaction back untouched. A failure at
//! step 4 reverts the store and metrics from begin-time snapshots before
//! rolling back -- durability outranks a phantom commit on both sides.
//! Recovery treats a `Prepared` record without a terminal follow-up as
//! rolled back, so the two views agree.
//!
//! Consecutive append failures trip a process-wide breaker: new commits
//! fail fast until the operator confirms storage is healthy. Reads keep
//! working throughout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use riftstate_store::{StateStore, WorldMetrics};
use riftstate_types::{
    LogPhase, Metric, ScopeKey, StatePayload, StateTransaction, TransactionId,
    TransactionMetadata, TransactionStatus, ValidationError,
};
use riftstate_wal::{Checkpoint, CheckpointFile, DurableLog, LogRecord};

use rust_decimal::Decimal;

use riftstate_types::CheckpointId;

use crate::alerts::{AlertCategory, AlertLog, AlertSeverity};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::locks::{LockController, LockHandle};

// ---------------------------------------------------------------------------
// Receipts and statistics
// ---------------------------------------------------------------------------

/// Returned by a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// The committed transaction.
    pub transaction_id: TransactionId,
    /// The scope that changed.
    pub scope_key: ScopeKey,
    /// The scope's new committed version.
    pub version: u64,
}

/// A point-in-time snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Transactions committed since startup.
    pub commits: u64,
    /// Transactions rolled back (caller-requested or internal).
    pub rollbacks: u64,
    /// Commits rejected by the optimistic version check.
    pub conflicts: u64,
    /// Begins that timed out waiting for a scope lock.
    pub lock_timeouts: u64,
    /// Transactions force-rolled-back by lock idle expiry.
    pub forced_rollbacks: u64,
    /// Durable-log append failures observed.
    pub io_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    conflicts: AtomicU64,
    lock_timeouts: AtomicU64,
    forced_rollbacks: AtomicU64,
    io_failures: AtomicU64,
}

// ---------------------------------------------------------------------------
// Transaction manager
// ---------------------------------------------------------------------------

/// Orchestrates transactions over the store, metrics, locks, and log.
#[derive(Debug)]
pub struct TransactionManager {
    store: StateStore,
    metrics: WorldMetrics,
    log: Mutex<DurableLog>,
    locks: LockController,
    transactions: Mutex<BTreeMap<TransactionId, StateTransaction>>,
    handles: Mutex<BTreeMap<TransactionId, LockHandle>>,
    force_expired: Mutex<BTreeSet<TransactionId>>,
    io_failures: AtomicU32,
    io_failure_threshold: u32,
    lock_wait: Duration,
    lock_idle_expiry: Option<Duration>,
    alerts: std::sync::Arc<AlertLog>,
    counters: Counters,
}

impl TransactionManager {
    /// Build a manager over recovered store/metrics state and an open log.
    pub fn new(
        config: &EngineConfig,
        store: StateStore,
        metrics: WorldMetrics,
        log: DurableLog,
        alerts: std::sync::Arc<AlertLog>,
    ) -> Self {
        Self {
            store,
            metrics,
            log: Mutex::new(log),
            locks: LockController::new(),
            transactions: Mutex::new(BTreeMap::new()),
            handles: Mutex::new(BTreeMap::new()),
            force_expired: Mutex::new(BTreeSet::new()),
            io_failures: AtomicU32::new(0),
            io_failure_threshold: config.io_failure_threshold,
            lock_wait: config.lock_wait(),
            lock_idle_expiry: config.lock_idle_expiry(),
            alerts,
            counters: Counters::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Boundary operations
    // -----------------------------------------------------------------------

    /// Begin a transaction on `scope_key`, proposing `new_state`.
    ///
    /// Acquires the scope's exclusive lock (bounded wait) and snapshots
    /// the current committed entry as the transaction's previous state.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] for a bad payload or empty entity,
    /// [`EngineError::LockTimeout`] if the scope stays contended.
    pub fn begin(
        &self,
        scope_key: ScopeKey,
        new_state: StatePayload,
        metadata: TransactionMetadata,
    ) -> Result<TransactionId, EngineError> {
        if scope_key.entity.trim().is_empty() {
            return Err(EngineError::Validation(ValidationError::EmptyField {
                field: "entity",
            }));
        }
        new_state.validate_for(scope_key.state_type)?;

        self.expire_idle_locks();

        let id = TransactionId::new();
        let handle = match self.locks.acquire(&scope_key, id, self.lock_wait) {
            Ok(handle) => handle,
            Err(err) => {
                self.counters.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };

        let snapshot = self.store.entry(&scope_key);
        let transaction = StateTransaction {
            id,
            begun_at: Utc::now(),
            state_type: scope_key.state_type,
            scope_key: scope_key.clone(),
            previous_state: snapshot.as_ref().map(|entry| entry.state.clone()),
            begin_version: snapshot.as_ref().map(|entry| entry.version),
            new_state,
            status: TransactionStatus::Pending,
            metadata,
        };
        debug!(transaction = %id, scope = %scope_key, "transaction begun");

        self.transactions.lock().insert(id, transaction);
        self.handles.lock().insert(id, handle);
        Ok(id)
    }

    /// Commit a pending transaction.
    ///
    /// # Errors
    ///
    /// See the crate error taxonomy; conflicts and lock timeouts are
    /// retryable by re-beginning, everything else is not.
    pub fn commit(&self, id: TransactionId) -> Result<CommitReceipt, EngineError> {
        let transaction = {
            let transactions = self.transactions.lock();
            transactions
                .get(&id)
                .ok_or(EngineError::UnknownTransaction(id))?
                .clone()
        };

        if self.force_expired.lock().remove(&id) {
            // The lock expired and the engine already rolled this
            // transaction back. If a competitor committed in the
            // meantime, surface that as the conflict it is; otherwise
            // report the expiry itself.
            let found = self.store.version_of(&transaction.scope_key);
            if found != transaction.begin_version {
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(EngineError::Conflict {
                    scope_key: transaction.scope_key,
                    expected: transaction.begin_version,
                    found,
                });
            }
            return Err(EngineError::LockExpired { transaction_id: id });
        }

        if transaction.status.is_terminal() {
            return Err(EngineError::TransactionFinalized {
                transaction_id: id,
                status: transaction.status,
            });
        }

        if self.breaker_open() {
            self.finalize_rollback(id, "commit breaker open");
            return Err(EngineError::Io {
                detail: format!(
                    "commit breaker open after {} consecutive log failures; \
                     confirm storage health to resume",
                    self.io_failures.load(Ordering::Relaxed)
                ),
            });
        }

        // Optimistic check: the committed version must not have moved
        // since begin. The scope lock makes this unreachable in the happy
        // path; it guards force-expiry races.
        let found = self.store.version_of(&transaction.scope_key);
        if found != transaction.begin_version {
            self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            self.finalize_rollback(id, "optimistic version check failed");
            return Err(EngineError::Conflict {
                scope_key: transaction.scope_key,
                expected: transaction.begin_version,
                found,
            });
        }

        let target_version = match transaction.begin_version {
            Some(version) => match version.checked_add(1) {
                Some(next) => next,
                None => {
                    self.finalize_rollback(id, "version counter overflow");
                    return Err(riftstate_store::StoreError::VersionOverflow {
                        scope_key: transaction.scope_key.clone(),
                    }
                    .into());
                }
            },
            None => 0,
        };

        let deltas = transaction.metadata.metric_deltas.clone();
        let version = {
            let mut log = self.log.lock();

            let prepared = LogRecord {
                transaction_id: id,
                phase: LogPhase::Prepared,
                state_type: transaction.state_type,
                scope_key: transaction.scope_key.clone(),
                version_after: target_version,
                payload: transaction.new_state.clone(),
                metric_deltas: Vec::new(),
                timestamp: Utc::now(),
            };
            if let Err(err) = log.append(&prepared) {
                drop(log);
                return Err(self.fail_commit_on_io(id, &transaction.scope_key, err, "prepared"));
            }

            // Begin-time snapshots back the revert path if the committed
            // record cannot be made durable.
            let prior_entry = self.store.entry(&transaction.scope_key);
            let touched: Vec<Metric> = deltas.iter().map(|delta| delta.metric).collect();
            let saved_metrics = self.metrics.values_of(touched);

            let version = match self
                .store
                .apply(&transaction.scope_key, transaction.new_state.clone(), id)
            {
                Ok(version) => version,
                Err(err) => {
                    drop(log);
                    self.finalize_rollback(id, "version counter overflow");
                    return Err(err.into());
                }
            };
            self.metrics.apply_all(&deltas);

            let committed = LogRecord {
                transaction_id: id,
                phase: LogPhase::Committed,
                state_type: transaction.state_type,
                scope_key: transaction.scope_key.clone(),
                version_after: version,
                payload: transaction.new_state.clone(),
                metric_deltas: deltas,
                timestamp: Utc::now(),
            };
            if let Err(err) = log.append(&committed) {
                self.store
                    .restore_entry(&transaction.scope_key, prior_entry);
                self.metrics.restore(&saved_metrics);
                drop(log);
                return Err(self.fail_commit_on_io(id, &transaction.scope_key, err, "committed"));
            }

            self.io_failures.store(0, Ordering::Relaxed);
            version
        };

        self.finalize(id, TransactionStatus::Committed, None);
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        info!(transaction = %id, scope = %transaction.scope_key, version, "transaction committed");
        Ok(CommitReceipt {
            transaction_id: id,
            scope_key: transaction.scope_key,
            version,
        })
    }

    /// Roll back a pending transaction, recording `reason`.
    ///
    /// The store was never touched, so nothing is reapplied; the scope
    /// lock is released and a `RolledBack` record appended best-effort.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownTransaction`] or
    /// [`EngineError::TransactionFinalized`] for bad ids;
    /// [`EngineError::LockExpired`] if the engine already force-rolled
    /// this transaction back.
    pub fn rollback(&self, id: TransactionId, reason: &str) -> Result<(), EngineError> {
        if self.force_expired.lock().remove(&id) {
            return Err(EngineError::LockExpired { transaction_id: id });
        }
        {
            let transactions = self.transactions.lock();
            let transaction = transactions
                .get(&id)
                .ok_or(EngineError::UnknownTransaction(id))?;
            if transaction.status.is_terminal() {
                return Err(EngineError::TransactionFinalized {
                    transaction_id: id,
                    status: transaction.status,
                });
            }
        }
        self.finalize_rollback(id, reason);
        Ok(())
    }

    /// Read the last committed payload and version for `scope_key`.
    pub fn read_state(&self, scope_key: &ScopeKey) -> Option<(StatePayload, u64)> {
        self.store.read(scope_key)
    }

    /// The committed version for `scope_key` without cloning its payload.
    pub fn version_of(&self, scope_key: &ScopeKey) -> Option<u64> {
        self.store.version_of(scope_key)
    }

    /// Read one world metric.
    pub fn read_metric(&self, metric: Metric) -> Decimal {
        self.metrics.get(metric)
    }

    /// Every metric's current value.
    pub fn metrics_snapshot(&self) -> Vec<(Metric, Decimal)> {
        self.metrics.snapshot()
    }

    /// The lifecycle status of a transaction, if known.
    pub fn transaction_status(&self, id: TransactionId) -> Option<TransactionStatus> {
        self.transactions
            .lock()
            .get(&id)
            .map(|transaction| transaction.status)
    }

    /// A clone of the full transaction record, if known.
    pub fn transaction(&self, id: TransactionId) -> Option<StateTransaction> {
        self.transactions.lock().get(&id).cloned()
    }

    // -----------------------------------------------------------------------
    // Durability management
    // -----------------------------------------------------------------------

    /// Whether the commit breaker is open.
    pub fn breaker_open(&self) -> bool {
        self.io_failure_threshold > 0
            && self.io_failures.load(Ordering::Relaxed) >= self.io_failure_threshold
    }

    /// Operator confirmation that storage is healthy again; resets the
    /// commit breaker.
    pub fn mark_storage_healthy(&self) {
        self.io_failures.store(0, Ordering::Relaxed);
        info!("storage marked healthy; commit breaker reset");
    }

    /// Write a checkpoint of the current store and metrics.
    ///
    /// Holds the log lock while snapshotting so the recorded offset is
    /// exactly consistent with the captured entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the checkpoint cannot be written.
    pub fn checkpoint_into(&self, file: &CheckpointFile) -> Result<CheckpointId, EngineError> {
        let log = self.log.lock();
        let checkpoint = Checkpoint {
            id: CheckpointId::new(),
            taken_at: Utc::now(),
            log_offset: log.len_bytes(),
            entries: self.store.snapshot(),
            metrics: self.metrics.snapshot(),
        };
        file.write(&checkpoint)?;
        drop(log);
        Ok(checkpoint.id)
    }

    /// Audit query: every log record touching `scope_key`.
    ///
    /// # Errors
    ///
    /// Propagates log replay errors, including corruption.
    pub fn log_records_for_scope(
        &self,
        scope_key: &ScopeKey,
    ) -> Result<Vec<LogRecord>, EngineError> {
        Ok(self.log.lock().records_for_scope(scope_key)?)
    }

    /// Audit query: every log record for `transaction_id`.
    ///
    /// # Errors
    ///
    /// Propagates log replay errors, including corruption.
    pub fn log_records_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LogRecord>, EngineError> {
        Ok(self.log.lock().records_for_transaction(transaction_id)?)
    }

    /// Current counter values.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            commits: self.counters.commits.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            lock_timeouts: self.counters.lock_timeouts.load(Ordering::Relaxed),
            forced_rollbacks: self.counters.forced_rollbacks.load(Ordering::Relaxed),
            io_failures: self.counters.io_failures.load(Ordering::Relaxed),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Force-expire idle scope locks and roll back their transactions.
    fn expire_idle_locks(&self) {
        let Some(expiry) = self.lock_idle_expiry else {
            return;
        };
        for (scope_key, transaction_id) in self.locks.expire_idle(expiry) {
            warn!(
                scope = %scope_key,
                transaction = %transaction_id,
                "force-rolling-back transaction after lock expiry"
            );
            self.counters.forced_rollbacks.fetch_add(1, Ordering::Relaxed);
            self.alerts.raise(
                AlertSeverity::Warning,
                AlertCategory::Locking,
                format!("lock on {scope_key} expired; transaction {transaction_id} rolled back"),
            );
            // The lock table entry is already gone; drop the stale handle
            // and mark the transaction so its holder learns on next use.
            self.handles.lock().remove(&transaction_id);
            self.finalize_rollback(transaction_id, "scope lock idle expiry");
            self.force_expired.lock().insert(transaction_id);
        }
    }

    /// Record an append failure: count it, alert, roll the transaction
    /// back, and surface the mapped error.
    fn fail_commit_on_io(
        &self,
        id: TransactionId,
        scope_key: &ScopeKey,
        err: riftstate_wal::WalError,
        record_kind: &str,
    ) -> EngineError {
        let failures = self
            .io_failures
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        self.counters.io_failures.fetch_add(1, Ordering::Relaxed);
        error!(
            transaction = %id,
            scope = %scope_key,
            failures,
            "durable log {record_kind} append failed: {err}"
        );
        self.alerts.raise(
            AlertSeverity::Critical,
            AlertCategory::Durability,
            format!("{record_kind} append failed for {scope_key}: {err}"),
        );
        if self.breaker_open() {
            self.alerts.raise(
                AlertSeverity::Critical,
                AlertCategory::Durability,
                "commit breaker open; new commits halted until storage is confirmed healthy",
            );
        }
        self.finalize_rollback(id, &format!("{record_kind} append failed"));
        err.into()
    }

    /// Mark a transaction rolled back, append its record best-effort, and
    /// release its lock.
    fn finalize_rollback(&self, id: TransactionId, reason: &str) {
        let record = {
            let mut transactions = self.transactions.lock();
            match transactions.get_mut(&id) {
                Some(transaction) if transaction.is_pending() => {
                    transaction.status = TransactionStatus::RolledBack;
                    transaction.metadata.failure = Some(reason.to_owned());
                    Some(LogRecord {
                        transaction_id: id,
                        phase: LogPhase::RolledBack,
                        state_type: transaction.state_type,
                        scope_key: transaction.scope_key.clone(),
                        version_after: transaction.begin_version.unwrap_or(0),
                        payload: transaction.new_state.clone(),
                        metric_deltas: Vec::new(),
                        timestamp: Utc::now(),
                    })
                }
                _ => None,
            }
        };

        if let Some(record) = record {
            // Best-effort: the store was never touched, so a failed
            // rollback append cannot create inconsistency. Recovery sees
            // either no record or a lone Prepared, both read as rolled
            // back.
            if let Err(err) = self.log.lock().append(&record) {
                warn!(transaction = %id, "rollback record append failed: {err}");
            }
            self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
            debug!(transaction = %id, reason, "transaction rolled back");
        }

        self.release_lock(id);
    }

    /// Mark a terminal status and release the scope lock.
    fn finalize(&self, id: TransactionId, status: TransactionStatus, failure: Option<String>) {
        {
            let mut transactions = self.transactions.lock();
            if let Some(transaction) = transactions.get_mut(&id) {
                if transaction.is_pending() {
                    transaction.status = status;
                    transaction.metadata.failure = failure;
                }
            }
        }
        self.release_lock(id);
    }

    /// Release the lock handle held for `id`, if any.
    fn release_lock(&self, id: TransactionId) {
        if let Some(handle) = self.handles.lock().remove(&id) {
            self.locks.release(&handle);
        }
    }
}
