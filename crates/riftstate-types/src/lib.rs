//! Shared type definitions for the Riftstate world-state engine.
//!
//! This crate is the single source of truth for all types used across the
//! Riftstate workspace: the durable log, the state store, and the engine
//! all speak in these terms.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for transactions, events, and
//!   checkpoints
//! - [`enums`] -- State categories, lifecycle statuses, log phases, and
//!   world metrics
//! - [`payload`] -- Schema-validated state payloads, one variant per
//!   category
//! - [`structs`] -- Scope keys, transactions, versioned entries, and
//!   metric deltas
//! - [`event`] -- World events, trigger conditions, consequences, and
//!   outcomes

pub mod enums;
pub mod event;
pub mod ids;
pub mod payload;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EventCategory, EventSeverity, LogPhase, Metric, StateType, TransactionStatus};
pub use event::{Consequence, EventOutcome, TriggerCondition, WorldEvent};
pub use ids::{AlertId, CheckpointId, EventId, TransactionId};
pub use payload::{StatePayload, ValidationError};
pub use structs::{
    MetricDelta, ScopeKey, StateTransaction, TransactionMetadata, VersionedEntry,
};
