//! Transaction manager, scope locks, recovery, and event pipeline for the
//! Riftstate world-state engine.
//!
//! Riftstate applies structured changes to shared game state (celestial
//! events, rituals, dimensional anomalies, territory control, faction
//! standing) with begin/commit/rollback semantics, a checksummed durable
//! log, crash recovery, and per-scope concurrency control. Concurrent
//! subsystems never observe or produce inconsistent state.
//!
//! # Architecture
//!
//! - [`engine`] -- The [`WorldStateEngine`] boundary facade.
//! - [`txn`] -- The [`TransactionManager`]: begin → validate → log →
//!   apply / rollback with an optimistic version check per scope.
//! - [`locks`] -- The [`LockController`]: one in-flight transaction per
//!   scope key, bounded waits, idle expiry.
//! - [`recovery`] -- The [`RecoveryManager`]: checkpoint restore plus
//!   ordered log replay; incomplete transactions are discarded.
//! - [`pipeline`] -- The [`EventPipeline`]: trigger evaluation and
//!   ordered consequence application with bounded retries.
//! - [`alerts`] -- Operator-visible [`AlertLog`].
//! - [`config`] -- YAML [`EngineConfig`] in the usual typed-defaults
//!   style.
//! - [`error`] -- The [`EngineError`] taxonomy.
//!
//! # Guarantees
//!
//! - Commits to one scope key are strictly serialized; versions increase
//!   by exactly 1 per commit and never change on rollback.
//! - Reads are lock-free and always see the last committed value.
//! - A change is acknowledged only after its log records are fsynced; a
//!   crash mid-commit recovers to the pre-transaction state.
//! - Metrics stay inside [0, 1] no matter the applied deltas.
//!
//! # Usage
//!
//! ```no_run
//! use riftstate_engine::{EngineConfig, WorldStateEngine};
//! use riftstate_types::{ScopeKey, StatePayload, StateType, TransactionMetadata};
//! use rust_decimal::Decimal;
//!
//! # fn main() -> Result<(), riftstate_engine::EngineError> {
//! let engine = WorldStateEngine::open(EngineConfig::default())?;
//!
//! let scope = ScopeKey::new(StateType::FactionState, "mystics");
//! let id = engine.begin_transaction(
//!     scope.clone(),
//!     StatePayload::Faction {
//!         reputation: 600,
//!         influence: Decimal::new(4, 1),
//!         at_war: false,
//!     },
//!     TransactionMetadata::for_origin("faction_logic"),
//! )?;
//! let receipt = engine.commit_transaction(id)?;
//! assert_eq!(engine.read_state(&scope).map(|(_, v)| v), Some(receipt.version));
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod pipeline;
pub mod recovery;
pub mod txn;

// Re-export primary types at crate root.
pub use alerts::{Alert, AlertCategory, AlertLog, AlertSeverity};
pub use config::{ConfigError, EngineConfig};
pub use engine::WorldStateEngine;
pub use error::EngineError;
pub use locks::{LockController, LockHandle};
pub use pipeline::{EventPipeline, EventRejection, TickReport};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use txn::{CommitReceipt, EngineStats, TransactionManager};
