//! Log record bodies and the on-disk frame format.
//!
//! Every transaction phase produces a [`LogRecord`] appended to the
//! durable log. Records are serialized as JSON and framed as:
//!
//! ```text
//! [u32 BE body length][32-byte blake3 checksum of body][body bytes]
//! ```
//!
//! The checksum covers the serialized body and detects partial or torn
//! writes during replay. A frame cut short by end-of-file is a torn tail
//! (the normal crash point); a complete frame whose checksum does not
//! match its bytes is corruption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use riftstate_types::{
    LogPhase, MetricDelta, ScopeKey, StatePayload, StateType, TransactionId,
};

use crate::WalError;

/// Bytes occupied by the frame header: 4-byte length + 32-byte checksum.
pub const FRAME_HEADER_LEN: usize = 4 + 32;

/// Upper bound on a serialized record body; anything larger is rejected at
/// append time and treated as corruption at replay time.
pub const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Record body
// ---------------------------------------------------------------------------

/// One durable-log record: a transaction phase plus enough state to
/// rebuild the store during recovery.
///
/// `version_after` is the scope version the transaction produces on
/// commit; for `RolledBack` records it repeats the unchanged begin-time
/// version. `metric_deltas` is populated only on `Committed` records so
/// recovery can reapply metric side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// The transaction this record belongs to.
    pub transaction_id: TransactionId,
    /// Lifecycle phase being recorded.
    pub phase: LogPhase,
    /// The state category of the affected scope.
    pub state_type: StateType,
    /// The affected scope key.
    pub scope_key: ScopeKey,
    /// The scope version after this transaction commits.
    pub version_after: u64,
    /// The proposed payload (discarded payload, for rollback records).
    pub payload: StatePayload,
    /// Metric adjustments applied with the commit; empty otherwise.
    pub metric_deltas: Vec<MetricDelta>,
    /// When the record was appended.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Serialize this record into a complete on-disk frame.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Serialization`] if the body cannot be encoded,
    /// or [`WalError::RecordTooLarge`] if it exceeds [`MAX_BODY_LEN`].
    pub fn encode_frame(&self) -> Result<Vec<u8>, WalError> {
        let body = serde_json::to_vec(self)?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= MAX_BODY_LEN)
            .ok_or(WalError::RecordTooLarge { len: body.len() })?;

        let checksum = blake3::hash(&body);
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN.saturating_add(body.len()));
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(checksum.as_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a record from a verified body slice.
    ///
    /// The caller (the replay cursor) has already checked the frame's
    /// checksum against these bytes.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, WalError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Verify a frame body against its declared checksum.
pub(crate) fn checksum_matches(expected: &[u8; 32], body: &[u8]) -> bool {
    blake3::hash(body).as_bytes() == expected
}
