//! The boundary facade consumed by every collaborator.
//!
//! [`WorldStateEngine::open`] runs recovery and wires the transaction
//! manager, event pipeline, checkpointing, and alert log together.
//! Collaborators (quest generation, ritual/combat/territory handlers,
//! faction logic) interact only through this surface: they read state and
//! metrics, submit events, and drive transactions -- they never write
//! payloads into the store directly.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::warn;

use riftstate_store::{StateStore, WorldMetrics};
use riftstate_types::{
    CheckpointId, EventId, Metric, ScopeKey, StatePayload, StateTransaction, TransactionId,
    TransactionMetadata, TransactionStatus, WorldEvent,
};
use riftstate_wal::{CheckpointFile, DurableLog, LogRecord};

use crate::alerts::{Alert, AlertCategory, AlertLog, AlertSeverity};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pipeline::{EventPipeline, EventRejection, TickReport};
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::txn::{CommitReceipt, EngineStats, TransactionManager};

use riftstate_types::AlertId;

/// The transactional world-state engine.
#[derive(Debug)]
pub struct WorldStateEngine {
    config: EngineConfig,
    manager: TransactionManager,
    pipeline: Mutex<EventPipeline>,
    checkpoint_file: CheckpointFile,
    alerts: std::sync::Arc<AlertLog>,
    recovery: RecoveryReport,
    commits_at_last_checkpoint: AtomicU64,
}

impl WorldStateEngine {
    /// Open the engine: create the data directory, run recovery against
    /// the durable log and checkpoint, and start serving.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] for filesystem failures and
    /// [`EngineError::Corruption`] if recovery finds unverifiable state
    /// (startup halts rather than serving wrong data).
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|err| EngineError::Io {
            detail: format!("cannot create data dir: {err}"),
        })?;

        let mut log = DurableLog::open(config.log_path())?;
        let checkpoint_file = CheckpointFile::new(config.checkpoint_path());
        let alerts = std::sync::Arc::new(AlertLog::new());
        let store = StateStore::new();
        let metrics = WorldMetrics::new();

        let recovery =
            RecoveryManager::recover(&mut log, &checkpoint_file, &store, &metrics, &alerts)?;

        let pipeline = EventPipeline::new(
            config.consequence_retry_limit,
            config.consequence_retry_backoff(),
        );
        let manager = TransactionManager::new(
            &config,
            store,
            metrics,
            log,
            std::sync::Arc::clone(&alerts),
        );

        Ok(Self {
            config,
            manager,
            pipeline: Mutex::new(pipeline),
            checkpoint_file,
            alerts,
            recovery,
            commits_at_last_checkpoint: AtomicU64::new(0),
        })
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Begin a transaction proposing `new_state` for `scope_key`.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::begin`].
    pub fn begin_transaction(
        &self,
        scope_key: ScopeKey,
        new_state: StatePayload,
        metadata: TransactionMetadata,
    ) -> Result<TransactionId, EngineError> {
        self.manager.begin(scope_key, new_state, metadata)
    }

    /// Commit a pending transaction, then take an automatic checkpoint if
    /// one is due.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn commit_transaction(&self, id: TransactionId) -> Result<CommitReceipt, EngineError> {
        let receipt = self.manager.commit(id)?;
        self.maybe_auto_checkpoint();
        Ok(receipt)
    }

    /// Roll back a pending transaction with a reason.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::rollback`].
    pub fn rollback_transaction(&self, id: TransactionId, reason: &str) -> Result<(), EngineError> {
        self.manager.rollback(id, reason)
    }

    /// The lifecycle status of a transaction, if known.
    pub fn transaction_status(&self, id: TransactionId) -> Option<TransactionStatus> {
        self.manager.transaction_status(id)
    }

    /// A clone of the full transaction record, if known.
    pub fn transaction(&self, id: TransactionId) -> Option<StateTransaction> {
        self.manager.transaction(id)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The last committed payload and version for `scope_key`.
    pub fn read_state(&self, scope_key: &ScopeKey) -> Option<(StatePayload, u64)> {
        self.manager.read_state(scope_key)
    }

    /// The committed version for `scope_key`, if any.
    pub fn version_of(&self, scope_key: &ScopeKey) -> Option<u64> {
        self.manager.version_of(scope_key)
    }

    /// One world metric's current value.
    pub fn read_metric(&self, metric: Metric) -> Decimal {
        self.manager.read_metric(metric)
    }

    /// Every metric's current value.
    pub fn metrics_snapshot(&self) -> Vec<(Metric, Decimal)> {
        self.manager.metrics_snapshot()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Submit a world event for trigger evaluation.
    ///
    /// # Errors
    ///
    /// Returns an [`EventRejection`] when the event cannot be accepted.
    pub fn submit_event(&self, event: WorldEvent) -> Result<EventId, EventRejection> {
        self.pipeline.lock().submit(event)
    }

    /// Advance the pipeline one tick, applying satisfied events, then
    /// take an automatic checkpoint if one is due.
    pub fn advance_tick(&self, tick: u64) -> TickReport {
        let report = self
            .pipeline
            .lock()
            .advance_tick(tick, &self.manager, &self.alerts);
        self.maybe_auto_checkpoint();
        report
    }

    /// Look up a submitted event by id.
    pub fn event(&self, id: EventId) -> Option<WorldEvent> {
        self.pipeline.lock().event(id).cloned()
    }

    /// Events still awaiting their triggers.
    pub fn active_events(&self) -> Vec<WorldEvent> {
        self.pipeline.lock().active_events().to_vec()
    }

    /// Resolved events, oldest first.
    pub fn resolved_events(&self) -> Vec<WorldEvent> {
        self.pipeline.lock().resolved_events().to_vec()
    }

    // -----------------------------------------------------------------------
    // Durability and observability
    // -----------------------------------------------------------------------

    /// Write a checkpoint now, regardless of the automatic cadence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the checkpoint cannot be written.
    pub fn checkpoint(&self) -> Result<CheckpointId, EngineError> {
        let id = self.manager.checkpoint_into(&self.checkpoint_file)?;
        self.commits_at_last_checkpoint
            .store(self.manager.stats().commits, Ordering::Relaxed);
        Ok(id)
    }

    /// Operator confirmation that storage is healthy; reopens commits
    /// after the breaker tripped.
    pub fn mark_storage_healthy(&self) {
        self.manager.mark_storage_healthy();
    }

    /// All operator alerts, newest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.all()
    }

    /// Acknowledge an alert. Returns whether it was found.
    pub fn acknowledge_alert(&self, id: AlertId) -> bool {
        self.alerts.acknowledge(id)
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStats {
        self.manager.stats()
    }

    /// What recovery found when this engine opened.
    pub const fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Audit query: every log record touching `scope_key`.
    ///
    /// # Errors
    ///
    /// Propagates log replay errors.
    pub fn log_records_for_scope(
        &self,
        scope_key: &ScopeKey,
    ) -> Result<Vec<LogRecord>, EngineError> {
        self.manager.log_records_for_scope(scope_key)
    }

    /// Audit query: every log record for one transaction.
    ///
    /// # Errors
    ///
    /// Propagates log replay errors.
    pub fn log_records_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LogRecord>, EngineError> {
        self.manager.log_records_for_transaction(transaction_id)
    }

    /// The configuration this engine was opened with.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take an automatic checkpoint when enough commits have accumulated.
    fn maybe_auto_checkpoint(&self) {
        let every = self.config.checkpoint_every_commits;
        if every == 0 {
            return;
        }
        let commits = self.manager.stats().commits;
        let last = self.commits_at_last_checkpoint.load(Ordering::Relaxed);
        if commits.saturating_sub(last) < every {
            return;
        }
        if let Err(err) = self.checkpoint() {
            warn!("automatic checkpoint failed: {err}");
            self.alerts.raise(
                AlertSeverity::Warning,
                AlertCategory::Durability,
                format!("automatic checkpoint failed: {err}"),
            );
        }
    }
}
