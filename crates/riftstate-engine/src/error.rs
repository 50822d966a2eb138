//! Error taxonomy for the Riftstate engine.
//!
//! The taxonomy separates routine, retryable conditions (conflicts, lock
//! timeouts) from permanent caller errors (validation) and from durability
//! threats (I/O failures, corruption) that are escalated rather than
//! masked. From a calling subsystem's perspective, any error means "this
//! world-state change did not happen".

use riftstate_store::StoreError;
use riftstate_types::{ScopeKey, TransactionId, TransactionStatus, ValidationError};
use riftstate_wal::WalError;

/// Errors surfaced by the transaction manager and engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The optimistic version check failed at commit: the scope's
    /// committed version moved since `begin`. Retryable -- re-begin
    /// against the new version.
    #[error(
        "version conflict on {scope_key}: began at {expected:?}, store now at {found:?}"
    )]
    Conflict {
        /// The contested scope.
        scope_key: ScopeKey,
        /// Committed version at begin time (`None` = no entry).
        expected: Option<u64>,
        /// Committed version found at commit time.
        found: Option<u64>,
    },

    /// The scope lock could not be acquired within the bounded wait.
    /// Retryable with backoff.
    #[error("lock on {scope_key} not acquired within {waited_ms}ms")]
    LockTimeout {
        /// The contested scope.
        scope_key: ScopeKey,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The caller's lock sat idle past the configured expiry; the engine
    /// force-rolled the transaction back.
    #[error("transaction {transaction_id} was force-rolled-back after its lock expired")]
    LockExpired {
        /// The transaction that lost its lock.
        transaction_id: TransactionId,
    },

    /// The payload failed its category schema check. Permanent -- the
    /// caller must fix the payload; the engine never coerces it.
    #[error("payload validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A durable-log append failed. The affected transaction was rolled
    /// back and an operator alert raised; repeated failures trip the
    /// breaker and halt new commits until storage is confirmed healthy.
    #[error("durable log failure: {detail}")]
    Io {
        /// What the log layer reported.
        detail: String,
    },

    /// The durable log or checkpoint failed verification during
    /// recovery. Fatal: startup halts rather than serving unverified
    /// state.
    #[error("durable log corruption at offset {offset}: {detail}")]
    Corruption {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// What failed verification.
        detail: String,
    },

    /// A state-store invariant failed (version counter overflow).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No transaction with this id is known to the manager.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// The transaction already reached a terminal status; terminal
    /// transactions are immutable.
    #[error("transaction {transaction_id} already finalized as {status:?}")]
    TransactionFinalized {
        /// The finalized transaction.
        transaction_id: TransactionId,
        /// Its terminal status.
        status: TransactionStatus,
    },
}

impl EngineError {
    /// Whether the caller may retry by re-running begin/commit.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::LockTimeout { .. })
    }
}

impl From<WalError> for EngineError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Corruption { offset, detail } => Self::Corruption { offset, detail },
            WalError::Io(io) => Self::Io {
                detail: io.to_string(),
            },
            WalError::Serialization(ser) => Self::Io {
                detail: format!("record serialization failed: {ser}"),
            },
            WalError::RecordTooLarge { len } => Self::Io {
                detail: format!("record body of {len} bytes exceeds the frame limit"),
            },
        }
    }
}
