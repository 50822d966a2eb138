//! Operator-visible alerts raised by the engine.
//!
//! Durability failures, recovery anomalies, and partial event application
//! must never be masked -- they land here for the hosting process to
//! surface. The log is bounded; the oldest alerts fall off first.
//!
//! # Alert Categories
//!
//! - `durability` -- durable-log append failures and breaker trips
//! - `recovery` -- discarded incomplete transactions, truncated tails
//! - `pipeline` -- partial or failed event application
//! - `locking` -- force-expired scope locks

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use riftstate_types::AlertId;

// ---------------------------------------------------------------------------
// Alert types
// ---------------------------------------------------------------------------

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational -- a notable event that does not require action.
    Info,
    /// Warning -- something is off but not critical.
    Warning,
    /// Critical -- immediate attention required.
    Critical,
}

/// Category of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// Durable-log failures threatening the durability guarantee.
    Durability,
    /// Recovery-time anomalies (discarded transactions, truncated tail).
    Recovery,
    /// Event-pipeline application failures.
    Pipeline,
    /// Scope-lock expiries and forced rollbacks.
    Locking,
}

/// A single alert raised by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier.
    pub id: AlertId,
    /// Severity of the alert.
    pub severity: AlertSeverity,
    /// Alert category.
    pub category: AlertCategory,
    /// Human-readable message.
    pub message: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
    /// Whether the operator has acknowledged this alert.
    pub acknowledged: bool,
}

// ---------------------------------------------------------------------------
// Alert log
// ---------------------------------------------------------------------------

/// Maximum alerts to keep in memory.
const MAX_ALERTS: usize = 500;

/// Bounded in-memory alert log, newest first.
#[derive(Debug, Default)]
pub struct AlertLog {
    alerts: RwLock<Vec<Alert>>,
}

impl AlertLog {
    /// Create an empty alert log.
    pub const fn new() -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Raise an alert, returning its id.
    ///
    /// If the log exceeds its bound, the oldest alert is dropped.
    pub fn raise(
        &self,
        severity: AlertSeverity,
        category: AlertCategory,
        message: impl Into<String>,
    ) -> AlertId {
        let alert = Alert {
            id: AlertId::new(),
            severity,
            category,
            message: message.into(),
            raised_at: Utc::now(),
            acknowledged: false,
        };
        let id = alert.id;
        let mut alerts = self.alerts.write();
        alerts.insert(0, alert);
        if alerts.len() > MAX_ALERTS {
            alerts.truncate(MAX_ALERTS);
        }
        id
    }

    /// All alerts, newest first.
    pub fn all(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Acknowledge an alert by id. Returns whether it was found.
    pub fn acknowledge(&self, id: AlertId) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|alert| alert.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Number of unacknowledged alerts at or above `severity`.
    pub fn unacknowledged(&self, severity: AlertSeverity) -> usize {
        self.alerts
            .read()
            .iter()
            .filter(|alert| !alert.acknowledged && alert.severity >= severity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_prepends_newest_first() {
        let log = AlertLog::new();
        log.raise(AlertSeverity::Info, AlertCategory::Recovery, "first");
        log.raise(AlertSeverity::Critical, AlertCategory::Durability, "second");

        let alerts = log.all();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts.first().map(|a| a.message.clone()), Some("second".to_owned()));
    }

    #[test]
    fn acknowledge_marks_alert() {
        let log = AlertLog::new();
        let id = log.raise(AlertSeverity::Warning, AlertCategory::Pipeline, "partial");
        assert_eq!(log.unacknowledged(AlertSeverity::Warning), 1);
        assert!(log.acknowledge(id));
        assert_eq!(log.unacknowledged(AlertSeverity::Warning), 0);
    }

    #[test]
    fn acknowledge_unknown_id_is_false() {
        let log = AlertLog::new();
        assert!(!log.acknowledge(AlertId::new()));
    }

    #[test]
    fn severity_filter_counts_at_or_above() {
        let log = AlertLog::new();
        log.raise(AlertSeverity::Info, AlertCategory::Recovery, "note");
        log.raise(AlertSeverity::Critical, AlertCategory::Durability, "disk");
        assert_eq!(log.unacknowledged(AlertSeverity::Warning), 1);
        assert_eq!(log.unacknowledged(AlertSeverity::Info), 2);
    }

    #[test]
    fn log_is_bounded() {
        let log = AlertLog::new();
        for i in 0..600 {
            log.raise(
                AlertSeverity::Info,
                AlertCategory::Recovery,
                format!("alert {i}"),
            );
        }
        assert_eq!(log.all().len(), MAX_ALERTS);
    }
}
