//! Startup recovery: rebuild the state store from the durable log.
//!
//! The log is the sole source of truth. Recovery loads the checkpoint (if
//! any), replays records from its offset, and applies every transaction
//! whose last record is `Committed`. A `Prepared` record with no terminal
//! follow-up marks a crash mid-commit: the transaction is discarded and
//! the pre-crash state is never trusted as committed.
//!
//! Failure handling during replay:
//!
//! - A torn tail (end-of-file inside a frame) is the crash point. Replay
//!   stops there and the tail is truncated so the log is appendable again.
//! - A checksum mismatch on a complete frame is corruption. Recovery
//!   halts with [`EngineError::Corruption`] rather than serving
//!   potentially-wrong state.
//! - A version gap between replayed commits for one scope is corruption
//!   for the same reason.

use std::collections::BTreeMap;

use tracing::{info, warn};

use riftstate_store::{StateStore, WorldMetrics};
use riftstate_types::{LogPhase, ScopeKey, TransactionId, VersionedEntry};
use riftstate_wal::{CheckpointFile, DurableLog};

use crate::alerts::{AlertCategory, AlertLog, AlertSeverity};
use crate::error::EngineError;

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether a checkpoint was loaded.
    pub checkpoint_loaded: bool,
    /// Log offset replay resumed from.
    pub resumed_from: u64,
    /// Committed transactions reapplied during replay.
    pub replayed_commits: u64,
    /// Incomplete (`Prepared`-only) transactions discarded.
    pub discarded_incomplete: u64,
    /// Offset of a truncated torn tail, if one was found.
    pub truncated_tail: Option<u64>,
}

/// Replays the durable log into a fresh store and metrics aggregator.
#[derive(Debug, Default)]
pub struct RecoveryManager;

impl RecoveryManager {
    /// Run recovery, populating `store` and `metrics`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corruption`] for checksum or version-
    /// continuity failures, and [`EngineError::Io`] for filesystem
    /// failures.
    pub fn recover(
        log: &mut DurableLog,
        checkpoint_file: &CheckpointFile,
        store: &StateStore,
        metrics: &WorldMetrics,
        alerts: &AlertLog,
    ) -> Result<RecoveryReport, EngineError> {
        let mut report = RecoveryReport::default();

        if let Some(checkpoint) = checkpoint_file.load()? {
            if checkpoint.log_offset > log.len_bytes() {
                return Err(EngineError::Corruption {
                    offset: checkpoint.log_offset,
                    detail: format!(
                        "checkpoint resumes at {} but the log holds only {} bytes",
                        checkpoint.log_offset,
                        log.len_bytes()
                    ),
                });
            }
            for (scope_key, entry) in checkpoint.entries {
                store.install(scope_key, entry);
            }
            metrics.restore(&checkpoint.metrics);
            report.checkpoint_loaded = true;
            report.resumed_from = checkpoint.log_offset;
            info!(
                resumed_from = checkpoint.log_offset,
                entries = store.len(),
                "checkpoint restored"
            );
        }

        let mut pending: BTreeMap<TransactionId, ScopeKey> = BTreeMap::new();
        let mut cursor = log.replay_from(report.resumed_from)?;

        while let Some((offset, record)) = cursor.next_record()? {
            match record.phase {
                LogPhase::Prepared => {
                    pending.insert(record.transaction_id, record.scope_key);
                }
                LogPhase::Committed => {
                    pending.remove(&record.transaction_id);

                    let expected = match store.version_of(&record.scope_key) {
                        Some(version) => {
                            version.checked_add(1).ok_or(EngineError::Corruption {
                                offset,
                                detail: format!(
                                    "version counter overflow for {}",
                                    record.scope_key
                                ),
                            })?
                        }
                        None => 0,
                    };
                    if record.version_after != expected {
                        return Err(EngineError::Corruption {
                            offset,
                            detail: format!(
                                "version gap for {}: log says {}, replay expects {expected}",
                                record.scope_key, record.version_after
                            ),
                        });
                    }

                    store.install(
                        record.scope_key.clone(),
                        VersionedEntry {
                            state: record.payload,
                            version: record.version_after,
                            last_transaction: record.transaction_id,
                            committed_at: record.timestamp,
                        },
                    );
                    metrics.apply_all(&record.metric_deltas);
                    report.replayed_commits = report.replayed_commits.saturating_add(1);
                }
                LogPhase::RolledBack => {
                    pending.remove(&record.transaction_id);
                }
            }
        }

        if let Some(torn_offset) = cursor.torn_tail() {
            drop(cursor);
            log.truncate_to(torn_offset)?;
            report.truncated_tail = Some(torn_offset);
            alerts.raise(
                AlertSeverity::Warning,
                AlertCategory::Recovery,
                format!("torn log tail truncated at offset {torn_offset}"),
            );
        }

        report.discarded_incomplete = u64::try_from(pending.len()).unwrap_or(u64::MAX);
        for (transaction_id, scope_key) in pending {
            warn!(
                transaction = %transaction_id,
                scope = %scope_key,
                "prepared transaction without terminal record discarded"
            );
            alerts.raise(
                AlertSeverity::Warning,
                AlertCategory::Recovery,
                format!(
                    "transaction {transaction_id} on {scope_key} was mid-commit at crash; \
                     treated as rolled back"
                ),
            );
        }

        info!(
            replayed = report.replayed_commits,
            discarded = report.discarded_incomplete,
            "recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use riftstate_types::{
        CheckpointId, Metric, MetricDelta, StatePayload, StateType,
    };
    use riftstate_wal::{Checkpoint, LogRecord};
    use rust_decimal::Decimal;
    use std::io::Write as _;

    /// Helper: the mystics faction scope.
    fn mystics() -> ScopeKey {
        ScopeKey::new(StateType::FactionState, "mystics")
    }

    /// Helper: a faction payload with the given reputation.
    fn faction(reputation: i64) -> StatePayload {
        StatePayload::Faction {
            reputation,
            influence: Decimal::new(4, 1),
            at_war: false,
        }
    }

    /// Helper: a log record for `mystics` in the given phase/version.
    fn record(id: TransactionId, phase: LogPhase, version_after: u64) -> LogRecord {
        LogRecord {
            transaction_id: id,
            phase,
            state_type: StateType::FactionState,
            scope_key: mystics(),
            version_after,
            payload: faction(500),
            metric_deltas: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Helper: run recovery over the given dir's log and checkpoint.
    fn recover_in(dir: &tempfile::TempDir) -> (StateStore, WorldMetrics, RecoveryReport) {
        let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("world.checkpoint"));
        let store = StateStore::new();
        let metrics = WorldMetrics::new();
        let alerts = AlertLog::new();
        let report =
            RecoveryManager::recover(&mut log, &checkpoint, &store, &metrics, &alerts).unwrap();
        (store, metrics, report)
    }

    #[test]
    fn empty_log_recovers_to_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, report) = recover_in(&dir);
        assert!(store.is_empty());
        assert_eq!(report, RecoveryReport::default());
    }

    #[test]
    fn committed_records_rebuild_entries_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
            let id = TransactionId::new();
            log.append(&record(id, LogPhase::Prepared, 0)).unwrap();
            let mut committed = record(id, LogPhase::Committed, 0);
            committed.metric_deltas =
                vec![MetricDelta::new(Metric::Corruption, Decimal::new(2, 1))];
            log.append(&committed).unwrap();
        }

        let (store, metrics, report) = recover_in(&dir);
        assert_eq!(store.read(&mystics()), Some((faction(500), 0)));
        assert_eq!(metrics.get(Metric::Corruption), Decimal::new(7, 1));
        assert_eq!(report.replayed_commits, 1);
        assert_eq!(report.discarded_incomplete, 0);
    }

    #[test]
    fn prepared_without_terminal_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
            let committed_id = TransactionId::new();
            log.append(&record(committed_id, LogPhase::Prepared, 0)).unwrap();
            log.append(&record(committed_id, LogPhase::Committed, 0)).unwrap();
            // Crash struck after this prepared record.
            log.append(&record(TransactionId::new(), LogPhase::Prepared, 1))
                .unwrap();
        }

        let (store, _, report) = recover_in(&dir);
        // The scope shows only the committed transaction's state.
        assert_eq!(store.read(&mystics()), Some((faction(500), 0)));
        assert_eq!(report.replayed_commits, 1);
        assert_eq!(report.discarded_incomplete, 1);
    }

    #[test]
    fn rolled_back_records_leave_no_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
            let id = TransactionId::new();
            log.append(&record(id, LogPhase::Prepared, 0)).unwrap();
            log.append(&record(id, LogPhase::RolledBack, 0)).unwrap();
        }

        let (store, _, report) = recover_in(&dir);
        assert!(store.is_empty());
        assert_eq!(report.discarded_incomplete, 0);
    }

    #[test]
    fn version_gap_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
            let id = TransactionId::new();
            log.append(&record(id, LogPhase::Committed, 0)).unwrap();
            // Version 2 with no version 1 in between.
            log.append(&record(TransactionId::new(), LogPhase::Committed, 2))
                .unwrap();
        }

        let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("world.checkpoint"));
        let result = RecoveryManager::recover(
            &mut log,
            &checkpoint,
            &StateStore::new(),
            &WorldMetrics::new(),
            &AlertLog::new(),
        );
        assert!(matches!(result, Err(EngineError::Corruption { .. })));
    }

    #[test]
    fn torn_tail_is_truncated_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.wal");
        let whole_len = {
            let mut log = DurableLog::open(&path).unwrap();
            let id = TransactionId::new();
            log.append(&record(id, LogPhase::Prepared, 0)).unwrap();
            log.append(&record(id, LogPhase::Committed, 0)).unwrap();
            log.len_bytes()
        };
        // Half a frame lands after the last whole record.
        let partial = record(TransactionId::new(), LogPhase::Prepared, 1)
            .encode_frame()
            .unwrap();
        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(partial.get(..partial.len() / 2).unwrap()).unwrap();
        drop(raw);

        let (store, _, report) = recover_in(&dir);
        assert_eq!(store.read(&mystics()), Some((faction(500), 0)));
        assert_eq!(report.truncated_tail, Some(whole_len));

        // The log is whole again after truncation.
        let log = DurableLog::open(&path).unwrap();
        assert_eq!(log.len_bytes(), whole_len);
    }

    #[test]
    fn checkpoint_bounds_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("world.wal");
        let checkpoint_path = dir.path().join("world.checkpoint");

        // One commit, then a checkpoint, then a second commit.
        let offset_after_first = {
            let mut log = DurableLog::open(&wal_path).unwrap();
            let first = TransactionId::new();
            log.append(&record(first, LogPhase::Prepared, 0)).unwrap();
            log.append(&record(first, LogPhase::Committed, 0)).unwrap();
            let offset = log.len_bytes();

            let entry = VersionedEntry {
                state: faction(500),
                version: 0,
                last_transaction: first,
                committed_at: Utc::now(),
            };
            CheckpointFile::new(&checkpoint_path)
                .write(&Checkpoint {
                    id: CheckpointId::new(),
                    taken_at: Utc::now(),
                    log_offset: offset,
                    entries: vec![(mystics(), entry)],
                    metrics: vec![(Metric::Stability, Decimal::new(5, 1))],
                })
                .unwrap();

            let second = TransactionId::new();
            log.append(&record(second, LogPhase::Prepared, 1)).unwrap();
            log.append(&record(second, LogPhase::Committed, 1)).unwrap();
            offset
        };

        let (store, _, report) = recover_in(&dir);
        assert!(report.checkpoint_loaded);
        assert_eq!(report.resumed_from, offset_after_first);
        // Only the post-checkpoint commit is replayed...
        assert_eq!(report.replayed_commits, 1);
        // ...but the store ends at the latest version regardless.
        assert_eq!(store.read(&mystics()), Some((faction(500), 1)));
    }

    #[test]
    fn checkpoint_past_log_end_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        CheckpointFile::new(dir.path().join("world.checkpoint"))
            .write(&Checkpoint {
                id: CheckpointId::new(),
                taken_at: Utc::now(),
                log_offset: 4096,
                entries: Vec::new(),
                metrics: Vec::new(),
            })
            .unwrap();

        let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
        let result = RecoveryManager::recover(
            &mut log,
            &CheckpointFile::new(dir.path().join("world.checkpoint")),
            &StateStore::new(),
            &WorldMetrics::new(),
            &AlertLog::new(),
        );
        assert!(matches!(result, Err(EngineError::Corruption { .. })));
    }
}
