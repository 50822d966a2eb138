//! Periodic checkpoint snapshots of the state store.
//!
//! A checkpoint bounds replay time: recovery restores the snapshotted
//! entries and metrics, then replays the log only from the recorded
//! offset. Checkpoints use the same length + checksum + body frame as log
//! records and are written atomically (temp file, fsync, rename) so a
//! crash mid-checkpoint leaves the previous checkpoint intact.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use riftstate_types::{CheckpointId, Metric, ScopeKey, VersionedEntry};

use crate::record::{checksum_matches, FRAME_HEADER_LEN, MAX_BODY_LEN};
use crate::WalError;

// ---------------------------------------------------------------------------
// Checkpoint body
// ---------------------------------------------------------------------------

/// A full snapshot of the state store and metrics at a log offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique checkpoint identifier.
    pub id: CheckpointId,
    /// When the checkpoint was taken.
    pub taken_at: DateTime<Utc>,
    /// Log offset from which replay should resume.
    pub log_offset: u64,
    /// Every versioned entry, ordered by scope key.
    pub entries: Vec<(ScopeKey, VersionedEntry)>,
    /// Every metric value at checkpoint time.
    pub metrics: Vec<(Metric, Decimal)>,
}

// ---------------------------------------------------------------------------
// Checkpoint file
// ---------------------------------------------------------------------------

/// Reader/writer for the checkpoint sidecar file.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    /// Bind to the checkpoint file at `path` (it need not exist yet).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `checkpoint` atomically, replacing any previous checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] on write/rename failure,
    /// [`WalError::Serialization`] if encoding fails, or
    /// [`WalError::RecordTooLarge`] for an oversized snapshot.
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<(), WalError> {
        let body = serde_json::to_vec(checkpoint)?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= MAX_BODY_LEN)
            .ok_or(WalError::RecordTooLarge { len: body.len() })?;
        let checksum = blake3::hash(&body);

        let tmp_path = self.path.with_extension("checkpoint.tmp");
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&len.to_be_bytes())?;
        tmp.write_all(checksum.as_bytes())?;
        tmp.write_all(&body)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        info!(
            path = %self.path.display(),
            log_offset = checkpoint.log_offset,
            entries = checkpoint.entries.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Load the checkpoint, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Corruption`] if the file exists but is torn or
    /// fails its checksum -- a damaged checkpoint must halt startup rather
    /// than silently fall back to a full replay of a log that may have
    /// been truncated past it.
    pub fn load(&self) -> Result<Option<Checkpoint>, WalError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(WalError::Io(err)),
        };

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        if raw.len() < FRAME_HEADER_LEN {
            return Err(WalError::Corruption {
                offset: 0,
                detail: "checkpoint file shorter than frame header".to_owned(),
            });
        }

        let declared = raw
            .get(0..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_be_bytes)
            .ok_or_else(|| WalError::Corruption {
                offset: 0,
                detail: "checkpoint header unreadable".to_owned(),
            })?;
        let checksum = raw
            .get(4..FRAME_HEADER_LEN)
            .and_then(|b| <[u8; 32]>::try_from(b).ok())
            .ok_or_else(|| WalError::Corruption {
                offset: 0,
                detail: "checkpoint checksum missing".to_owned(),
            })?;
        let body = raw.get(FRAME_HEADER_LEN..).unwrap_or(&[]);

        if u32::try_from(body.len()).ok() != Some(declared) {
            return Err(WalError::Corruption {
                offset: 0,
                detail: format!(
                    "checkpoint body length {} does not match declared {declared}",
                    body.len()
                ),
            });
        }
        if !checksum_matches(&checksum, body) {
            return Err(WalError::Corruption {
                offset: 0,
                detail: "checkpoint checksum mismatch".to_owned(),
            });
        }

        let checkpoint: Checkpoint = serde_json::from_slice(body)?;
        debug!(
            path = %self.path.display(),
            log_offset = checkpoint.log_offset,
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }
}
