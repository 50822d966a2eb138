//! Enumeration types for the Riftstate engine.
//!
//! Closed enumerations shared by every crate in the workspace: the state
//! categories the engine manages, transaction and log lifecycle phases,
//! world metrics, and event classification.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State categories
// ---------------------------------------------------------------------------

/// A category of world state managed by the engine.
///
/// Each category carries its own payload schema (see
/// [`StatePayload`](crate::payload::StatePayload)). Concurrency control and
/// versioning are scoped to a (category, entity) pair, never to the
/// category as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateType {
    /// A celestial phenomenon (eclipse, comet, blood moon) and its phase.
    CelestialEvent,
    /// An in-progress rite performed at a site by a set of celebrants.
    Ritual,
    /// A tear between planes with a measured flux level.
    DimensionalAnomaly,
    /// Control and contestation of a named territory.
    TerritoryState,
    /// Standing and disposition of a named faction.
    FactionState,
}

impl StateType {
    /// Stable snake_case tag used in log records and scope-key display.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::CelestialEvent => "celestial_event",
            Self::Ritual => "ritual",
            Self::DimensionalAnomaly => "dimensional_anomaly",
            Self::TerritoryState => "territory_state",
            Self::FactionState => "faction_state",
        }
    }

    /// All state categories, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::CelestialEvent,
        Self::Ritual,
        Self::DimensionalAnomaly,
        Self::TerritoryState,
        Self::FactionState,
    ];
}

impl core::fmt::Display for StateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

// ---------------------------------------------------------------------------
// Transaction lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of a state transaction.
///
/// A transaction is created `Pending` and transitions exactly once to a
/// terminal status. Terminal transactions are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Created by `begin`, holding its scope lock, not yet finalized.
    Pending,
    /// Durably applied; the scope's version was incremented.
    Committed,
    /// Discarded; the scope's state and version are untouched.
    RolledBack,
}

impl TransactionStatus {
    /// Whether this status is terminal (no further transition allowed).
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

// ---------------------------------------------------------------------------
// Durable-log phases
// ---------------------------------------------------------------------------

/// Phase of a transaction recorded in the durable log.
///
/// The log is the sole source of truth for recovery: a transaction whose
/// last record is `Prepared` (crash mid-commit) is treated as rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogPhase {
    /// The commit path validated the transaction and is about to apply it.
    Prepared,
    /// The state store applied the transaction's new state.
    Committed,
    /// The transaction was discarded without touching the store.
    RolledBack,
}

impl LogPhase {
    /// Whether this phase terminates the transaction's log history.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

// ---------------------------------------------------------------------------
// World metrics
// ---------------------------------------------------------------------------

/// A derived scalar world indicator.
///
/// Metric values live in the closed interval [0, 1] and are mutated only
/// as a side effect of committed transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// How settled the world is; wars and anomalies erode it.
    Stability,
    /// Economic and agricultural well-being.
    Prosperity,
    /// Ambient threat level from beasts, raids, and anomalies.
    Danger,
    /// Collective mood of the world's population.
    Morale,
    /// Spread of malign influence through institutions and land.
    Corruption,
    /// Density of ambient magic; rituals and anomalies feed it.
    MagicSaturation,
}

impl Metric {
    /// Stable snake_case name used in configuration and diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stability => "stability",
            Self::Prosperity => "prosperity",
            Self::Danger => "danger",
            Self::Morale => "morale",
            Self::Corruption => "corruption",
            Self::MagicSaturation => "magic_saturation",
        }
    }

    /// All metrics, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Stability,
        Self::Prosperity,
        Self::Danger,
        Self::Morale,
        Self::Corruption,
        Self::MagicSaturation,
    ];
}

impl core::fmt::Display for Metric {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Event classification
// ---------------------------------------------------------------------------

/// The kind of world event a collaborator submitted to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCategory {
    /// Celestial phenomena: eclipses, conjunctions, falling stars.
    Celestial,
    /// Ritual progression raised by the rite handlers.
    Ritual,
    /// Dimensional anomaly activity.
    Anomaly,
    /// Territory contests and sieges.
    Territorial,
    /// Faction diplomacy, schisms, and standing shifts.
    Factional,
}

/// How consequential an event is, for operator triage and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Local color; safe to drop on overload.
    Minor,
    /// Regionally significant; partial application warrants a warning.
    Major,
    /// World-shaping; failures are surfaced at critical severity.
    Cataclysmic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_type_tags_are_unique() {
        let mut tags: Vec<&str> = StateType::ALL.iter().map(|t| t.tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), StateType::ALL.len());
    }

    #[test]
    fn pending_is_not_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Committed.is_terminal());
        assert!(TransactionStatus::RolledBack.is_terminal());
    }

    #[test]
    fn prepared_is_not_terminal() {
        assert!(!LogPhase::Prepared.is_terminal());
        assert!(LogPhase::Committed.is_terminal());
        assert!(LogPhase::RolledBack.is_terminal());
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names: Vec<&str> = Metric::ALL.iter().map(|m| m.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Metric::ALL.len());
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(EventSeverity::Minor < EventSeverity::Major);
        assert!(EventSeverity::Major < EventSeverity::Cataclysmic);
    }
}
