//! The append-only durable log.
//!
//! The log is the sole source of truth for recovery; the in-memory state
//! store is a derived cache. Appends are flushed and fsynced before they
//! are reported durable -- a commit is acknowledged only after its
//! `Prepared` record reached disk.
//!
//! Replay distinguishes two failure shapes:
//!
//! - **Torn tail**: the final frame is cut short by end-of-file. This is
//!   the normal crash point; the cursor stops there and reports the torn
//!   offset so recovery can truncate the log.
//! - **Corruption**: a complete frame whose checksum does not match its
//!   bytes. Replay halts with [`WalError::Corruption`]; the engine must
//!   not serve unverified state.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use riftstate_types::{ScopeKey, TransactionId};

use crate::record::{checksum_matches, LogRecord, FRAME_HEADER_LEN, MAX_BODY_LEN};
use crate::WalError;

// ---------------------------------------------------------------------------
// Durable log
// ---------------------------------------------------------------------------

/// Append-only, checksummed transaction log backed by a single file.
#[derive(Debug)]
pub struct DurableLog {
    path: PathBuf,
    file: File,
    len: u64,
}

impl DurableLog {
    /// Open (or create) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.seek(SeekFrom::End(0))?;
        debug!(path = %path.display(), len_bytes = len, "durable log opened");
        Ok(Self { path, file, len })
    }

    /// Append a record and fsync it to disk.
    ///
    /// Returns the byte offset at which the record's frame begins.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the write or sync fails, or an encoding
    /// error from [`LogRecord::encode_frame`]. On failure the caller must
    /// treat the record as not written.
    pub fn append(&mut self, record: &LogRecord) -> Result<u64, WalError> {
        let frame = record.encode_frame()?;
        let offset = self.len;
        self.file.write_all(&frame)?;
        self.file.flush()?;
        self.file.sync_data()?;
        let frame_len = u64::try_from(frame.len()).unwrap_or(u64::MAX);
        self.len = self.len.saturating_add(frame_len);
        Ok(offset)
    }

    /// Current log length in bytes.
    pub const fn len_bytes(&self) -> u64 {
        self.len
    }

    /// Whether the log holds no records.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log to `offset`, discarding a torn tail found during
    /// recovery.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the truncation fails.
    pub fn truncate_to(&mut self, offset: u64) -> Result<(), WalError> {
        warn!(
            path = %self.path.display(),
            from = self.len,
            to = offset,
            "truncating durable log tail"
        );
        self.file.set_len(offset)?;
        self.file.sync_data()?;
        self.file.seek(SeekFrom::End(0))?;
        self.len = offset;
        Ok(())
    }

    /// Open a replay cursor at `offset` (0 for the full log).
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if a read handle cannot be opened.
    pub fn replay_from(&self, offset: u64) -> Result<ReplayCursor, WalError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(ReplayCursor {
            reader: BufReader::new(file),
            offset,
            torn_at: None,
        })
    }

    /// All records touching `scope_key`, in append order. Full scan; an
    /// audit helper, not a hot path.
    ///
    /// # Errors
    ///
    /// Propagates replay errors, including corruption.
    pub fn records_for_scope(&self, scope_key: &ScopeKey) -> Result<Vec<LogRecord>, WalError> {
        self.scan(|record| &record.scope_key == scope_key)
    }

    /// All records for `transaction_id`, in append order. Full scan.
    ///
    /// # Errors
    ///
    /// Propagates replay errors, including corruption.
    pub fn records_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LogRecord>, WalError> {
        self.scan(|record| record.transaction_id == transaction_id)
    }

    /// Scan the whole log, collecting records matching `keep`.
    fn scan(&self, keep: impl Fn(&LogRecord) -> bool) -> Result<Vec<LogRecord>, WalError> {
        let mut cursor = self.replay_from(0)?;
        let mut matches = Vec::new();
        while let Some((_, record)) = cursor.next_record()? {
            if keep(&record) {
                matches.push(record);
            }
        }
        Ok(matches)
    }
}

// ---------------------------------------------------------------------------
// Replay cursor
// ---------------------------------------------------------------------------

/// Sequential reader over log frames, verifying each checksum.
#[derive(Debug)]
pub struct ReplayCursor {
    reader: BufReader<File>,
    offset: u64,
    torn_at: Option<u64>,
}

impl ReplayCursor {
    /// Read the next record, returning `None` at the end of the log.
    ///
    /// A torn tail also ends iteration with `None`; [`Self::torn_tail`]
    /// then reports the offset of the incomplete frame.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Corruption`] if a complete frame fails its
    /// checksum or declares an implausible length, and [`WalError::Io`]
    /// on read failures.
    pub fn next_record(&mut self) -> Result<Option<(u64, LogRecord)>, WalError> {
        if self.torn_at.is_some() {
            return Ok(None);
        }
        let frame_start = self.offset;

        let mut header = [0_u8; FRAME_HEADER_LEN];
        match read_fully(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < FRAME_HEADER_LEN => {
                self.torn_at = Some(frame_start);
                return Ok(None);
            }
            _ => {}
        }

        let len_bytes = header
            .get(0..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .ok_or_else(|| corruption(frame_start, "frame header too short"))?;
        let body_len = u32::from_be_bytes(len_bytes);
        if body_len == 0 || body_len > MAX_BODY_LEN {
            return Err(corruption(
                frame_start,
                format!("implausible body length {body_len}"),
            ));
        }

        let checksum = header
            .get(4..FRAME_HEADER_LEN)
            .and_then(|b| <[u8; 32]>::try_from(b).ok())
            .ok_or_else(|| corruption(frame_start, "frame checksum missing"))?;

        let body_capacity = usize::try_from(body_len)
            .map_err(|_err| corruption(frame_start, "body length exceeds address space"))?;
        let mut body = vec![0_u8; body_capacity];
        let read = read_fully(&mut self.reader, &mut body)?;
        if read < body.len() {
            self.torn_at = Some(frame_start);
            return Ok(None);
        }

        if !checksum_matches(&checksum, &body) {
            return Err(corruption(frame_start, "checksum mismatch"));
        }

        let record = LogRecord::decode_body(&body)
            .map_err(|err| corruption(frame_start, format!("undecodable body: {err}")))?;

        let header_len = u64::try_from(FRAME_HEADER_LEN).unwrap_or(u64::MAX);
        self.offset = frame_start
            .saturating_add(header_len)
            .saturating_add(u64::from(body_len));
        Ok(Some((frame_start, record)))
    }

    /// The byte offset the cursor will read next (i.e. the end of the
    /// last whole record).
    pub const fn position(&self) -> u64 {
        self.offset
    }

    /// The offset of an incomplete trailing frame, if one was found.
    pub const fn torn_tail(&self) -> Option<u64> {
        self.torn_at
    }
}

/// Read into `buf` until it is full or EOF; returns the bytes read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, WalError> {
    let mut filled = 0_usize;
    while filled < buf.len() {
        let slot = buf.get_mut(filled..).unwrap_or(&mut []);
        let n = reader.read(slot)?;
        if n == 0 {
            break;
        }
        filled = filled.saturating_add(n);
    }
    Ok(filled)
}

/// Build a corruption error for `offset`.
fn corruption(offset: u64, detail: impl Into<String>) -> WalError {
    WalError::Corruption {
        offset,
        detail: detail.into(),
    }
}
