//! In-memory versioned state store and world metrics for the Riftstate
//! engine.
//!
//! Both structures are shared mutable resources whose mutation is funneled
//! exclusively through the transaction manager's commit path. Reads are
//! lock-free with respect to in-flight transactions and always return the
//! last-committed snapshot.
//!
//! # Architecture
//!
//! - [`store`] -- The [`StateStore`]: one [`VersionedEntry`] per scope
//!   key, versions strictly increasing by 1 per commit.
//! - [`metrics`] -- The [`WorldMetrics`] aggregator: derived scalar
//!   indicators clamped to [0, 1] with saturating updates.
//!
//! [`VersionedEntry`]: riftstate_types::VersionedEntry

pub mod metrics;
pub mod store;

// Re-export primary types at crate root.
pub use metrics::{WorldMetrics, NEUTRAL};
pub use store::StateStore;

use riftstate_types::ScopeKey;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur in the state-store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A scope's version counter would wrap past `u64::MAX`.
    #[error("version counter overflow for scope {scope_key}")]
    VersionOverflow {
        /// The scope whose counter would wrap.
        scope_key: ScopeKey,
    },
}
