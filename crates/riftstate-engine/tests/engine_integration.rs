//! Integration tests for the Riftstate engine.
//!
//! Exercises the full boundary surface against a real durable log in a
//! temp directory: version monotonicity, concurrency serialization,
//! crash recovery, metric clamping, and event application.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::arithmetic_side_effects,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use riftstate_engine::{EngineConfig, EngineError, WorldStateEngine};
use riftstate_types::{
    Consequence, EventCategory, EventId, EventOutcome, EventSeverity, LogPhase, Metric,
    MetricDelta, ScopeKey, StatePayload, StateType, TransactionId, TransactionMetadata,
    TriggerCondition, WorldEvent,
};
use riftstate_wal::{DurableLog, LogRecord};

// =============================================================================
// Helpers
// =============================================================================

/// Install a test subscriber once so `RUST_LOG` controls engine output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A config rooted in the given temp dir, tuned for fast tests.
fn config(dir: &tempfile::TempDir) -> EngineConfig {
    EngineConfig {
        data_dir: dir.path().to_path_buf(),
        lock_wait_ms: 40,
        lock_idle_expiry_ms: 0,
        checkpoint_every_commits: 0,
        consequence_retry_backoff_ms: 0,
        ..EngineConfig::default()
    }
}

/// The mystics faction scope.
fn mystics() -> ScopeKey {
    ScopeKey::new(StateType::FactionState, "mystics")
}

/// A faction payload with the given reputation.
fn faction(reputation: i64) -> StatePayload {
    StatePayload::Faction {
        reputation,
        influence: Decimal::new(4, 1),
        at_war: false,
    }
}

/// A territory payload controlled by `faction`.
fn territory(faction: &str, garrison: u32) -> StatePayload {
    StatePayload::Territory {
        controlling_faction: Some(faction.to_owned()),
        contested: false,
        garrison,
    }
}

/// Begin and commit in one step, panicking on failure.
fn commit(engine: &WorldStateEngine, scope: &ScopeKey, payload: StatePayload) -> u64 {
    let id = engine
        .begin_transaction(scope.clone(), payload, TransactionMetadata::default())
        .expect("begin");
    engine.commit_transaction(id).expect("commit").version
}

// =============================================================================
// Versioning and rollback
// =============================================================================

#[test]
fn faction_standing_scenario() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    // Drive the scope to version 3 holding reputation 500.
    for (version, reputation) in [(0_u64, 200_i64), (1, 300), (2, 400), (3, 500)] {
        assert_eq!(commit(&engine, &mystics(), faction(reputation)), version);
    }
    assert_eq!(engine.read_state(&mystics()), Some((faction(500), 3)));

    // The documented scenario: commit reputation 600 against version 3.
    let id = engine
        .begin_transaction(mystics(), faction(600), TransactionMetadata::default())
        .unwrap();
    let receipt = engine.commit_transaction(id).unwrap();
    assert_eq!(receipt.version, 4);
    assert_eq!(engine.read_state(&mystics()), Some((faction(600), 4)));
}

#[test]
fn rollback_restores_previous_state_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    let committed = StatePayload::Ritual {
        rite: "sealing_of_the_maw".to_owned(),
        stage: 2,
        total_stages: 7,
        celebrants: 13,
        disrupted: false,
    };
    let scope = ScopeKey::new(StateType::Ritual, "sealing_of_the_maw");
    commit(&engine, &scope, committed.clone());

    let id = engine
        .begin_transaction(
            scope.clone(),
            StatePayload::Ritual {
                rite: "sealing_of_the_maw".to_owned(),
                stage: 3,
                total_stages: 7,
                celebrants: 11,
                disrupted: true,
            },
            TransactionMetadata::default(),
        )
        .unwrap();
    engine.rollback_transaction(id, "celebrants scattered").unwrap();

    // Byte-for-byte: the committed payload and version are untouched.
    assert_eq!(engine.read_state(&scope), Some((committed, 0)));
}

#[test]
fn rollback_reason_is_recorded_on_the_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    let id = engine
        .begin_transaction(mystics(), faction(1), TransactionMetadata::default())
        .unwrap();
    engine.rollback_transaction(id, "quest abandoned").unwrap();

    let transaction = engine.transaction(id).unwrap();
    assert_eq!(transaction.metadata.failure.as_deref(), Some("quest abandoned"));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn concurrent_begins_on_one_scope_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        WorldStateEngine::open(EngineConfig {
            lock_wait_ms: 2_000,
            ..config(&dir)
        })
        .unwrap(),
    );

    let scope = ScopeKey::new(StateType::TerritoryState, "shattered_lands_north");
    let workers: Vec<_> = ["ashen_pact", "mystics"]
        .into_iter()
        .map(|faction_name| {
            let engine = Arc::clone(&engine);
            let scope = scope.clone();
            let faction_name = faction_name.to_owned();
            std::thread::spawn(move || {
                let id = engine
                    .begin_transaction(
                        scope,
                        territory(&faction_name, 50),
                        TransactionMetadata::default(),
                    )
                    .expect("begin");
                engine.commit_transaction(id).expect("commit").version
            })
        })
        .collect();

    let mut versions: Vec<u64> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker"))
        .collect();
    versions.sort_unstable();

    // Exactly one commit per version: never two commits against the same
    // pre-state.
    assert_eq!(versions, vec![0, 1]);
    assert_eq!(engine.version_of(&scope), Some(1));
}

#[test]
fn disjoint_scopes_commit_independently() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(WorldStateEngine::open(config(&dir)).unwrap());

    let workers: Vec<_> = (0_i64..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let scope = ScopeKey::new(StateType::FactionState, format!("faction_{i}"));
                for _ in 0..5 {
                    let id = engine
                        .begin_transaction(
                            scope.clone(),
                            faction(i),
                            TransactionMetadata::default(),
                        )
                        .expect("begin");
                    engine.commit_transaction(id).expect("commit");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    for i in 0..4 {
        let scope = ScopeKey::new(StateType::FactionState, format!("faction_{i}"));
        assert_eq!(engine.version_of(&scope), Some(4));
    }
    assert_eq!(engine.stats().commits, 20);
}

#[test]
fn outpaced_transaction_conflicts_and_rebegins() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    // A short idle expiry lets a second transaction take over a scope
    // whose first holder stalled.
    let engine = WorldStateEngine::open(EngineConfig {
        lock_idle_expiry_ms: 10,
        ..config(&dir)
    })
    .unwrap();

    let scope = ScopeKey::new(StateType::TerritoryState, "shattered_lands_north");
    let stalled = engine
        .begin_transaction(
            scope.clone(),
            territory("ashen_pact", 70),
            TransactionMetadata::default(),
        )
        .unwrap();
    std::thread::sleep(Duration::from_millis(25));

    // A rival sweeps the expired lock and commits first.
    let rival = engine
        .begin_transaction(
            scope.clone(),
            territory("mystics", 90),
            TransactionMetadata::default(),
        )
        .unwrap();
    engine.commit_transaction(rival).unwrap();

    // The stalled transaction's commit reports the conflict; it must
    // re-begin against the post-commit version.
    let err = engine.commit_transaction(stalled).unwrap_err();
    assert!(err.is_retryable());
    match err {
        EngineError::Conflict { expected, found, .. } => {
            assert_eq!(expected, None);
            assert_eq!(found, Some(0));
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    let retried = engine
        .begin_transaction(
            scope.clone(),
            territory("ashen_pact", 70),
            TransactionMetadata::default(),
        )
        .unwrap();
    assert_eq!(engine.commit_transaction(retried).unwrap().version, 1);
}

#[test]
fn contender_times_out_while_scope_is_held() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    let held = engine
        .begin_transaction(mystics(), faction(1), TransactionMetadata::default())
        .unwrap();
    let contender =
        engine.begin_transaction(mystics(), faction(2), TransactionMetadata::default());
    match contender {
        Err(err @ EngineError::LockTimeout { .. }) => assert!(err.is_retryable()),
        other => panic!("expected a lock timeout, got {other:?}"),
    }
    engine.rollback_transaction(held, "done").unwrap();
}

// =============================================================================
// Crash recovery
// =============================================================================

#[test]
fn crash_after_prepared_recovers_pre_transaction_state() {
    let dir = tempfile::tempdir().unwrap();
    let scope = mystics();
    {
        let engine = WorldStateEngine::open(config(&dir)).unwrap();
        commit(&engine, &scope, faction(500));
    }

    // Simulate a crash between the prepared and committed appends: a
    // lone prepared record for version 1 lands at the log tail.
    {
        let mut log = DurableLog::open(dir.path().join("world.wal")).unwrap();
        log.append(&LogRecord {
            transaction_id: TransactionId::new(),
            phase: LogPhase::Prepared,
            state_type: StateType::FactionState,
            scope_key: scope.clone(),
            version_after: 1,
            payload: faction(999),
            metric_deltas: Vec::new(),
            timestamp: Utc::now(),
        })
        .unwrap();
    }

    let engine = WorldStateEngine::open(config(&dir)).unwrap();
    // The interrupted transaction never happened.
    assert_eq!(engine.read_state(&scope), Some((faction(500), 0)));
    assert_eq!(engine.recovery_report().discarded_incomplete, 1);

    // The scope remains fully usable: the next commit takes version 1.
    assert_eq!(commit(&engine, &scope, faction(501)), 1);
}

#[test]
fn recovery_rebuilds_metrics_from_committed_deltas() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = WorldStateEngine::open(config(&dir)).unwrap();
        let metadata = TransactionMetadata::for_origin("anomaly_handler").with_deltas(vec![
            MetricDelta::new(Metric::MagicSaturation, Decimal::new(25, 2)),
            MetricDelta::new(Metric::Stability, Decimal::new(-15, 2)),
        ]);
        let id = engine
            .begin_transaction(
                ScopeKey::new(StateType::DimensionalAnomaly, "umbral_rift_07"),
                StatePayload::Anomaly {
                    anomaly_class: "umbral_rift".to_owned(),
                    flux: Decimal::new(8, 1),
                    contained: false,
                },
                metadata,
            )
            .unwrap();
        engine.commit_transaction(id).unwrap();
    }

    let engine = WorldStateEngine::open(config(&dir)).unwrap();
    assert_eq!(
        engine.read_metric(Metric::MagicSaturation),
        Decimal::new(75, 2)
    );
    assert_eq!(engine.read_metric(Metric::Stability), Decimal::new(35, 2));
}

#[test]
fn checkpoint_then_replay_matches_continuous_run() {
    let dir = tempfile::tempdir().unwrap();
    let scope = mystics();
    {
        let engine = WorldStateEngine::open(config(&dir)).unwrap();
        commit(&engine, &scope, faction(100));
        commit(&engine, &scope, faction(200));
        engine.checkpoint().unwrap();
        commit(&engine, &scope, faction(300));
    }

    let engine = WorldStateEngine::open(config(&dir)).unwrap();
    assert!(engine.recovery_report().checkpoint_loaded);
    assert_eq!(engine.recovery_report().replayed_commits, 1);
    assert_eq!(engine.read_state(&scope), Some((faction(300), 2)));
}

#[test]
fn corrupted_log_halts_startup() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = WorldStateEngine::open(config(&dir)).unwrap();
        commit(&engine, &mystics(), faction(500));
    }

    // Flip a byte inside the first record's body.
    let wal = dir.path().join("world.wal");
    let mut bytes = std::fs::read(&wal).unwrap();
    let target = riftstate_wal::FRAME_HEADER_LEN + 10;
    if let Some(byte) = bytes.get_mut(target) {
        *byte ^= 0xFF;
    }
    std::fs::write(&wal, &bytes).unwrap();

    assert!(matches!(
        WorldStateEngine::open(config(&dir)),
        Err(EngineError::Corruption { .. })
    ));
}

// =============================================================================
// Metrics
// =============================================================================

#[test]
fn metrics_stay_in_unit_interval_through_commits() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    let swings = [
        Decimal::new(500, 0),
        Decimal::new(-900, 0),
        Decimal::new(33, 2),
    ];
    for (index, swing) in swings.into_iter().enumerate() {
        let metadata = TransactionMetadata::for_origin("test")
            .with_deltas(vec![MetricDelta::new(Metric::Danger, swing)]);
        let id = engine
            .begin_transaction(
                mystics(),
                faction(i64::try_from(index).unwrap()),
                metadata,
            )
            .unwrap();
        engine.commit_transaction(id).unwrap();

        let value = engine.read_metric(Metric::Danger);
        assert!(value >= Decimal::ZERO);
        assert!(value <= Decimal::ONE);
    }
    for (metric, value) in engine.metrics_snapshot() {
        assert!(value >= Decimal::ZERO, "{metric} below range");
        assert!(value <= Decimal::ONE, "{metric} above range");
    }
}

// =============================================================================
// Events
// =============================================================================

/// An immediately-eligible territorial event.
fn contest_event(consequences: Vec<Consequence>) -> WorldEvent {
    WorldEvent {
        id: EventId::new(),
        category: EventCategory::Territorial,
        severity: EventSeverity::Major,
        location: "shattered_lands_north".to_owned(),
        triggers: vec![TriggerCondition::AfterTick { tick: 0 }],
        consequences,
        duration_ticks: 10,
        start_tick: 0,
        active: false,
        resolved: false,
        outcome: None,
    }
}

#[test]
fn event_with_failing_second_consequence_applies_partially() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    let north = ScopeKey::new(StateType::TerritoryState, "shattered_lands_north");
    let south = ScopeKey::new(StateType::TerritoryState, "shattered_lands_south");

    let id = engine
        .submit_event(contest_event(vec![
            Consequence {
                scope_key: north.clone(),
                new_state: territory("ashen_pact", 80),
                metric_deltas: Vec::new(),
                note: Some("northern push".to_owned()),
            },
            Consequence {
                // Empty rite name fails validation at the transaction
                // boundary, not at submission.
                scope_key: ScopeKey::new(StateType::Ritual, "war_blessing"),
                new_state: StatePayload::Ritual {
                    rite: String::new(),
                    stage: 1,
                    total_stages: 3,
                    celebrants: 5,
                    disrupted: false,
                },
                metric_deltas: Vec::new(),
                note: None,
            },
            Consequence {
                scope_key: south.clone(),
                new_state: territory("ashen_pact", 60),
                metric_deltas: Vec::new(),
                note: None,
            },
        ]))
        .unwrap();

    let report = engine.advance_tick(1);
    assert_eq!(report.partially_applied, 1);

    // First consequence applied, third never attempted, outcome recorded.
    assert!(engine.read_state(&north).is_some());
    assert!(engine.read_state(&south).is_none());
    let event = engine.event(id).unwrap();
    assert!(event.resolved);
    assert!(matches!(
        event.outcome,
        Some(EventOutcome::PartiallyApplied { failed_at: 1, .. })
    ));
}

#[test]
fn metric_gated_event_fires_once_threshold_is_crossed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    let north = ScopeKey::new(StateType::TerritoryState, "shattered_lands_north");
    let mut event = contest_event(vec![Consequence {
        scope_key: north.clone(),
        new_state: territory("mystics", 200),
        metric_deltas: vec![MetricDelta::new(Metric::Morale, Decimal::new(1, 1))],
        note: None,
    }]);
    event.triggers = vec![TriggerCondition::MetricAtLeast {
        metric: Metric::Corruption,
        threshold: Decimal::new(7, 1),
    }];
    event.duration_ticks = 100;
    engine.submit_event(event).unwrap();

    assert_eq!(engine.advance_tick(1).applied, 0);
    assert!(engine.read_state(&north).is_none());

    // Corruption creeps past the threshold via a committed delta.
    let metadata = TransactionMetadata::for_origin("cult_activity")
        .with_deltas(vec![MetricDelta::new(Metric::Corruption, Decimal::new(3, 1))]);
    let id = engine
        .begin_transaction(mystics(), faction(666), metadata)
        .unwrap();
    engine.commit_transaction(id).unwrap();

    assert_eq!(engine.advance_tick(2).applied, 1);
    assert!(engine.read_state(&north).is_some());
    assert_eq!(engine.read_metric(Metric::Morale), Decimal::new(6, 1));
}

#[test]
fn event_consequences_survive_crash_and_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let north = ScopeKey::new(StateType::TerritoryState, "shattered_lands_north");
    {
        let engine = WorldStateEngine::open(config(&dir)).unwrap();
        engine
            .submit_event(contest_event(vec![Consequence {
                scope_key: north.clone(),
                new_state: territory("ashen_pact", 80),
                metric_deltas: Vec::new(),
                note: None,
            }]))
            .unwrap();
        assert_eq!(engine.advance_tick(1).applied, 1);
    }

    let engine = WorldStateEngine::open(config(&dir)).unwrap();
    let (payload, version) = engine.read_state(&north).unwrap();
    assert_eq!(version, 0);
    assert_eq!(payload, territory("ashen_pact", 80));
}

// =============================================================================
// Audit trail
// =============================================================================

#[test]
fn log_audit_shows_full_transaction_history() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WorldStateEngine::open(config(&dir)).unwrap();

    commit(&engine, &mystics(), faction(100));
    let abandoned = engine
        .begin_transaction(mystics(), faction(200), TransactionMetadata::default())
        .unwrap();
    engine.rollback_transaction(abandoned, "abandoned").unwrap();
    commit(&engine, &mystics(), faction(300));

    let records = engine.log_records_for_scope(&mystics()).unwrap();
    let phases: Vec<LogPhase> = records.iter().map(|record| record.phase).collect();
    assert_eq!(
        phases,
        vec![
            LogPhase::Prepared,
            LogPhase::Committed,
            LogPhase::RolledBack,
            LogPhase::Prepared,
            LogPhase::Committed,
        ]
    );

    let rollback_records = engine.log_records_for_transaction(abandoned).unwrap();
    assert_eq!(rollback_records.len(), 1);
}
