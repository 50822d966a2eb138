//! Checksummed durable log and checkpoints for the Riftstate engine.
//!
//! Every transaction lifecycle phase is appended to an append-only log
//! before the change becomes visible. The log is the sole source of truth
//! for crash recovery; the in-memory state store is a derived cache that
//! can always be rebuilt by replay.
//!
//! # Architecture
//!
//! - [`record`] -- The [`LogRecord`] body and on-disk frame format.
//! - [`log`] -- The [`DurableLog`] writer and the checksum-verifying
//!   [`ReplayCursor`].
//! - [`checkpoint`] -- Atomic [`Checkpoint`] snapshots that bound replay
//!   time.
//!
//! # Frame format
//!
//! ```text
//! [u32 BE body length][32-byte blake3 checksum of body][body bytes]
//! ```
//!
//! | Failure shape | Meaning | Replay behavior |
//! |---------------|---------|-----------------|
//! | Torn tail (EOF mid frame) | Crash mid-append | Stop; truncate tail |
//! | Checksum mismatch on a whole frame | Bit rot / tampering | Halt with [`WalError::Corruption`] |

pub mod checkpoint;
pub mod log;
pub mod record;

// Re-export primary types at crate root.
pub use checkpoint::{Checkpoint, CheckpointFile};
pub use log::{DurableLog, ReplayCursor};
pub use record::{LogRecord, FRAME_HEADER_LEN, MAX_BODY_LEN};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur in the durable-log layer.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// An underlying filesystem operation failed.
    #[error("durable log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record or checkpoint body could not be encoded or decoded.
    #[error("durable log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A serialized body exceeded [`MAX_BODY_LEN`].
    #[error("record body of {len} bytes exceeds the frame limit")]
    RecordTooLarge {
        /// The oversized body length.
        len: usize,
    },

    /// A complete frame failed verification. Recovery must halt rather
    /// than serve unverified state.
    #[error("durable log corruption at offset {offset}: {detail}")]
    Corruption {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// What failed verification.
        detail: String,
    },
}
