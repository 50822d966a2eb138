//! Core entity structs for the Riftstate engine.
//!
//! Scope keys, transactions, versioned entries, and metric deltas. These
//! types are plain data: lifecycle enforcement (single terminal transition,
//! version continuity) lives in the transaction manager.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{Metric, StateType, TransactionStatus};
use crate::ids::TransactionId;
use crate::payload::StatePayload;

// ---------------------------------------------------------------------------
// Scope keys
// ---------------------------------------------------------------------------

/// The unit of concurrency control and versioning: a state category plus
/// a stable entity identifier.
///
/// Examples: `faction_state/mystics`, `territory_state/shattered_lands_north`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    /// The state category this key belongs to.
    pub state_type: StateType,
    /// Stable entity identifier within the category.
    pub entity: String,
}

impl ScopeKey {
    /// Create a scope key for the given category and entity.
    pub fn new(state_type: StateType, entity: impl Into<String>) -> Self {
        Self {
            state_type,
            entity: entity.into(),
        }
    }
}

impl core::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.state_type.tag(), self.entity)
    }
}

// ---------------------------------------------------------------------------
// Metric deltas
// ---------------------------------------------------------------------------

/// A signed adjustment to one world metric, declared on a transaction and
/// applied by the commit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDelta {
    /// The metric to adjust.
    pub metric: Metric,
    /// Signed change; the aggregator clamps the result to [0, 1].
    pub delta: Decimal,
}

impl MetricDelta {
    /// Create a metric delta.
    pub const fn new(metric: Metric, delta: Decimal) -> Self {
        Self { metric, delta }
    }
}

// ---------------------------------------------------------------------------
// Transaction metadata
// ---------------------------------------------------------------------------

/// Free-form diagnostic context attached to a transaction, plus the
/// metric deltas the commit path applies on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// The subsystem that submitted the change (e.g. "ritual_handler").
    pub origin: String,
    /// Optional human-readable reason for the change.
    pub reason: Option<String>,
    /// Metric adjustments applied atomically with the commit.
    pub metric_deltas: Vec<MetricDelta>,
    /// Failure detail recorded when the transaction is rolled back.
    pub failure: Option<String>,
}

impl TransactionMetadata {
    /// Create metadata attributed to the given subsystem.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Attach metric deltas to this metadata.
    #[must_use]
    pub fn with_deltas(mut self, deltas: Vec<MetricDelta>) -> Self {
        self.metric_deltas = deltas;
        self
    }

    /// Attach a reason string to this metadata.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// A state transaction: one proposed change to one scope key.
///
/// Created by `begin`, alive only while `Pending`, finalized exactly once.
/// `previous_state` and `begin_version` snapshot the scope at begin time;
/// they back the optimistic version check at commit and are never
/// reapplied on rollback (the store was never touched).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// When `begin` created this transaction.
    pub begun_at: DateTime<Utc>,
    /// The state category being changed.
    pub state_type: StateType,
    /// The scope key being changed.
    pub scope_key: ScopeKey,
    /// Payload snapshot at begin time; `None` when the scope had no entry.
    pub previous_state: Option<StatePayload>,
    /// Committed version at begin time; `None` when the scope had no entry.
    pub begin_version: Option<u64>,
    /// The proposed payload.
    pub new_state: StatePayload,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Diagnostic context and declared metric deltas.
    pub metadata: TransactionMetadata,
}

impl StateTransaction {
    /// Whether this transaction is still pending.
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, TransactionStatus::Pending)
    }
}

// ---------------------------------------------------------------------------
// Versioned entries
// ---------------------------------------------------------------------------

/// The state store's record for one scope key: the last committed payload
/// and its monotonic version.
///
/// Versions start at 0 on the first commit and increment by exactly 1 per
/// commit; rollbacks never change them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedEntry {
    /// The last committed payload.
    pub state: StatePayload,
    /// Monotonic commit counter for this scope key.
    pub version: u64,
    /// The transaction that produced this entry.
    pub last_transaction: TransactionId,
    /// When the producing transaction committed.
    pub committed_at: DateTime<Utc>,
}
