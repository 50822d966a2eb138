//! World events: external triggers that produce state transactions.
//!
//! Collaborators (quest generation, ritual handlers, combat resolvers)
//! construct a [`WorldEvent`] and submit it to the pipeline. The engine
//! never mutates an event beyond its `active`/`resolved` flags and the
//! recorded [`EventOutcome`] -- consequences and triggers are read-only.

use serde::{Deserialize, Serialize};

use crate::enums::{EventCategory, EventSeverity, Metric};
use crate::ids::{EventId, TransactionId};
use crate::payload::StatePayload;
use crate::structs::{MetricDelta, ScopeKey};

use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Trigger conditions
// ---------------------------------------------------------------------------

/// One evaluable condition in an event's trigger set.
///
/// An event fires only when every condition in its set holds against the
/// current committed state and metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// The metric must be at or above the threshold.
    MetricAtLeast {
        /// The metric to test.
        metric: Metric,
        /// Inclusive lower bound.
        threshold: Decimal,
    },

    /// The metric must be at or below the threshold.
    MetricAtMost {
        /// The metric to test.
        metric: Metric,
        /// Inclusive upper bound.
        threshold: Decimal,
    },

    /// The scope must exist at or beyond the given committed version.
    ScopeAtVersion {
        /// The scope to test.
        scope_key: ScopeKey,
        /// Inclusive minimum version.
        minimum: u64,
    },

    /// The scope must have no committed entry yet.
    ScopeMissing {
        /// The scope to test.
        scope_key: ScopeKey,
    },

    /// The world tick must have reached the given value.
    AfterTick {
        /// Inclusive earliest tick.
        tick: u64,
    },
}

// ---------------------------------------------------------------------------
// Consequences
// ---------------------------------------------------------------------------

/// One state-change intent declared by an event.
///
/// Each consequence becomes its own transaction; consequences of one event
/// are applied in declared order but are not atomic as a group across
/// scope keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consequence {
    /// The scope to change.
    pub scope_key: ScopeKey,
    /// The proposed payload for that scope.
    pub new_state: StatePayload,
    /// Metric adjustments committed alongside the state change.
    pub metric_deltas: Vec<MetricDelta>,
    /// Optional diagnostic note carried into the transaction metadata.
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How an event's application concluded. Recorded on resolution; an event
/// is never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOutcome {
    /// Every consequence committed.
    Applied {
        /// The committed transactions, in consequence order.
        transactions: Vec<TransactionId>,
    },

    /// A consequence failed permanently; earlier commits stand, later
    /// consequences were never attempted.
    PartiallyApplied {
        /// Transactions committed before the failure, in order.
        applied: Vec<TransactionId>,
        /// Index of the consequence that failed.
        failed_at: usize,
        /// Why it failed.
        reason: String,
    },

    /// The event's duration elapsed before its triggers were satisfied.
    Lapsed,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An external game event whose satisfied triggers produce transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// The kind of event.
    pub category: EventCategory,
    /// How consequential the event is.
    pub severity: EventSeverity,
    /// Where in the world the event takes place (display only).
    pub location: String,
    /// Conditions that must all hold for the consequences to fire.
    pub triggers: Vec<TriggerCondition>,
    /// Ordered state-change intents.
    pub consequences: Vec<Consequence>,
    /// How many ticks past `start_tick` the event stays eligible.
    pub duration_ticks: u64,
    /// The tick at which the event entered the world.
    pub start_tick: u64,
    /// Whether the pipeline is still evaluating this event.
    pub active: bool,
    /// Whether the event reached a recorded outcome.
    pub resolved: bool,
    /// The recorded outcome, set exactly once on resolution.
    pub outcome: Option<EventOutcome>,
}

impl WorldEvent {
    /// Whether the event's eligibility window has closed at `tick`.
    ///
    /// The window is inclusive: an event with `start_tick` 10 and
    /// `duration_ticks` 5 is still eligible at tick 15 and expired at 16.
    pub const fn expired_at(&self, tick: u64) -> bool {
        tick > self.start_tick.saturating_add(self.duration_ticks)
    }
}
