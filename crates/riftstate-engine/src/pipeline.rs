//! The event pipeline: from external game events to transactions.
//!
//! Collaborators submit [`WorldEvent`]s; each tick, the pipeline evaluates
//! every active event's trigger set against the current committed state
//! and metrics. When the triggers hold, consequences are applied in
//! declared order, each as its own transaction.
//!
//! Consequences are **not** atomic as a group across scope keys. Conflicts
//! and lock timeouts are retried a bounded number of times; a permanent
//! failure (validation, durability) stops the remaining consequences and
//! resolves the event with a recorded partial outcome -- never a silent
//! drop. Consumers must tolerate partial application across scopes.
//!
//! Consequence payloads are deliberately not schema-checked at submission:
//! validation is the transaction boundary's job, so a malformed payload
//! surfaces as a per-consequence `ValidationError` at application time.

use std::time::Duration;

use tracing::{debug, info, warn};

use riftstate_types::{
    EventId, EventOutcome, TransactionId, TransactionMetadata, TriggerCondition, WorldEvent,
};

use crate::alerts::{AlertCategory, AlertLog, AlertSeverity};
use crate::txn::TransactionManager;

/// Upper bound on retained resolved events.
const MAX_RESOLVED: usize = 1024;

// ---------------------------------------------------------------------------
// Rejection and reporting
// ---------------------------------------------------------------------------

/// Why an event was rejected at submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventRejection {
    /// The event declares no consequences; nothing to apply.
    #[error("event declares no consequences")]
    NoConsequences,

    /// The event's eligibility window is empty.
    #[error("event duration must be at least one tick")]
    ZeroDuration,

    /// The event arrived already marked resolved.
    #[error("event is already resolved")]
    AlreadyResolved,

    /// A consequence names a scope with an empty entity.
    #[error("consequence {index} names a scope with an empty entity")]
    EmptyScopeEntity {
        /// Index of the malformed consequence.
        index: usize,
    },
}

/// Summary of one pipeline tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick that was evaluated.
    pub tick: u64,
    /// Active events examined.
    pub evaluated: usize,
    /// Events whose consequences all committed.
    pub applied: usize,
    /// Events resolved with a recorded partial failure.
    pub partially_applied: usize,
    /// Events whose window elapsed before their triggers held.
    pub lapsed: usize,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Holds active events and drives their application.
#[derive(Debug)]
pub struct EventPipeline {
    active: Vec<WorldEvent>,
    resolved: Vec<WorldEvent>,
    retry_limit: u32,
    retry_backoff: Duration,
}

impl EventPipeline {
    /// Create a pipeline with the given consequence retry policy.
    pub const fn new(retry_limit: u32, retry_backoff: Duration) -> Self {
        Self {
            active: Vec::new(),
            resolved: Vec::new(),
            retry_limit,
            retry_backoff,
        }
    }

    /// Submit an event for evaluation.
    ///
    /// # Errors
    ///
    /// Returns an [`EventRejection`] describing why the event cannot be
    /// accepted; accepted events are marked active.
    pub fn submit(&mut self, mut event: WorldEvent) -> Result<EventId, EventRejection> {
        if event.resolved {
            return Err(EventRejection::AlreadyResolved);
        }
        if event.consequences.is_empty() {
            return Err(EventRejection::NoConsequences);
        }
        if event.duration_ticks == 0 {
            return Err(EventRejection::ZeroDuration);
        }
        for (index, consequence) in event.consequences.iter().enumerate() {
            if consequence.scope_key.entity.trim().is_empty() {
                return Err(EventRejection::EmptyScopeEntity { index });
            }
        }

        event.active = true;
        event.outcome = None;
        let id = event.id;
        debug!(event = %id, category = ?event.category, "event accepted");
        self.active.push(event);
        Ok(id)
    }

    /// Evaluate every active event at `tick`, applying those whose
    /// triggers hold.
    pub fn advance_tick(
        &mut self,
        tick: u64,
        manager: &TransactionManager,
        alerts: &AlertLog,
    ) -> TickReport {
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let events = std::mem::take(&mut self.active);
        for mut event in events {
            report.evaluated = report.evaluated.saturating_add(1);

            if event.expired_at(tick) {
                info!(event = %event.id, "event lapsed unapplied");
                report.lapsed = report.lapsed.saturating_add(1);
                self.resolve(&mut event, EventOutcome::Lapsed);
                continue;
            }

            if !Self::triggers_hold(&event.triggers, tick, manager) {
                self.active.push(event);
                continue;
            }

            let outcome = self.apply_consequences(&event, manager, alerts);
            match &outcome {
                EventOutcome::Applied { .. } => {
                    report.applied = report.applied.saturating_add(1);
                }
                EventOutcome::PartiallyApplied { .. } => {
                    report.partially_applied = report.partially_applied.saturating_add(1);
                }
                EventOutcome::Lapsed => {}
            }
            self.resolve(&mut event, outcome);
        }

        report
    }

    /// Whether every trigger condition holds.
    fn triggers_hold(
        triggers: &[TriggerCondition],
        tick: u64,
        manager: &TransactionManager,
    ) -> bool {
        triggers.iter().all(|condition| match condition {
            TriggerCondition::MetricAtLeast { metric, threshold } => {
                manager.read_metric(*metric) >= *threshold
            }
            TriggerCondition::MetricAtMost { metric, threshold } => {
                manager.read_metric(*metric) <= *threshold
            }
            TriggerCondition::ScopeAtVersion { scope_key, minimum } => manager
                .version_of(scope_key)
                .is_some_and(|version| version >= *minimum),
            TriggerCondition::ScopeMissing { scope_key } => {
                manager.version_of(scope_key).is_none()
            }
            TriggerCondition::AfterTick { tick: earliest } => tick >= *earliest,
        })
    }

    /// Apply consequences in declared order; stop at the first permanent
    /// failure.
    fn apply_consequences(
        &self,
        event: &WorldEvent,
        manager: &TransactionManager,
        alerts: &AlertLog,
    ) -> EventOutcome {
        let mut applied: Vec<TransactionId> = Vec::new();
        for (index, consequence) in event.consequences.iter().enumerate() {
            let metadata = TransactionMetadata::for_origin("event_pipeline")
                .with_reason(
                    consequence
                        .note
                        .clone()
                        .unwrap_or_else(|| format!("event {}", event.id)),
                )
                .with_deltas(consequence.metric_deltas.clone());

            match self.apply_one(consequence, metadata, manager) {
                Ok(transaction_id) => applied.push(transaction_id),
                Err(reason) => {
                    warn!(
                        event = %event.id,
                        consequence = index,
                        reason,
                        "consequence failed permanently; later consequences skipped"
                    );
                    alerts.raise(
                        AlertSeverity::Warning,
                        AlertCategory::Pipeline,
                        format!(
                            "event {} stopped at consequence {index}: {reason}",
                            event.id
                        ),
                    );
                    return EventOutcome::PartiallyApplied {
                        applied,
                        failed_at: index,
                        reason,
                    };
                }
            }
        }
        EventOutcome::Applied {
            transactions: applied,
        }
    }

    /// Apply one consequence with bounded retries on retryable errors.
    fn apply_one(
        &self,
        consequence: &riftstate_types::Consequence,
        metadata: TransactionMetadata,
        manager: &TransactionManager,
    ) -> Result<TransactionId, String> {
        let mut attempt = 0_u32;
        loop {
            let result = manager
                .begin(
                    consequence.scope_key.clone(),
                    consequence.new_state.clone(),
                    metadata.clone(),
                )
                .and_then(|id| manager.commit(id));

            match result {
                Ok(receipt) => return Ok(receipt.transaction_id),
                Err(err) if err.is_retryable() && attempt < self.retry_limit => {
                    attempt = attempt.saturating_add(1);
                    debug!(scope = %consequence.scope_key, attempt, "retrying consequence: {err}");
                    if !self.retry_backoff.is_zero() {
                        std::thread::sleep(self.retry_backoff);
                    }
                }
                Err(err) if err.is_retryable() => {
                    return Err(format!("retries exhausted after {attempt} attempts: {err}"));
                }
                Err(err) => return Err(err.to_string()),
            }
        }
    }

    /// Record the outcome and move the event to the resolved list.
    fn resolve(&mut self, event: &mut WorldEvent, outcome: EventOutcome) {
        event.active = false;
        event.resolved = true;
        event.outcome = Some(outcome);
        self.resolved.push(event.clone());
        if self.resolved.len() > MAX_RESOLVED {
            let excess = self.resolved.len().saturating_sub(MAX_RESOLVED);
            self.resolved.drain(..excess);
        }
    }

    /// Events still awaiting their triggers.
    pub fn active_events(&self) -> &[WorldEvent] {
        &self.active
    }

    /// Resolved events, oldest first.
    pub fn resolved_events(&self) -> &[WorldEvent] {
        &self.resolved
    }

    /// Look up an event in either list.
    pub fn event(&self, id: EventId) -> Option<&WorldEvent> {
        self.active
            .iter()
            .chain(self.resolved.iter())
            .find(|event| event.id == id)
    }
}
