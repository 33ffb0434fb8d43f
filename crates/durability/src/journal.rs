//! Redo journal
//!
//! A committed transaction is persisted as one [`JournalEntry`] holding its
//! redo rows. [`MemoryJournal`] keeps entries as framed, checksummed records:
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! Length covers format version, payload and CRC. The payload is the
//! msgpack encoding of the entry.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use strata_core::{Error, Result, SpaceId};

/// Current journal record format version
pub const JOURNAL_RECORD_FORMAT_VERSION: u8 = 1;

/// Kind of request a redo row replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Insert a new tuple
    Insert,
    /// Insert or overwrite
    Replace,
    /// Delete by key
    Delete,
    /// Update in place
    Update,
    /// Insert or update
    Upsert,
    /// No operation; keeps replication positions aligned
    Nop,
}

/// One replayable statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedoRow {
    /// What to replay
    pub request_type: RequestType,
    /// Originating replica; 0 for rows created locally
    pub replica_id: u32,
    /// Log sequence number, assigned by the journal for local rows
    pub lsn: i64,
    /// Row is not replicated
    pub group_local: bool,
    /// Target space
    pub space_id: Option<SpaceId>,
    /// Encoded tuple removed by the statement
    pub old_tuple: Option<Vec<u8>>,
    /// Encoded tuple installed by the statement
    pub new_tuple: Option<Vec<u8>>,
}

impl RedoRow {
    /// Row with no tuples attached
    pub fn new(request_type: RequestType, space_id: Option<SpaceId>) -> Self {
        RedoRow {
            request_type,
            replica_id: 0,
            lsn: 0,
            group_local: false,
            space_id,
            old_tuple: None,
            new_tuple: None,
        }
    }

    /// Whether the row originated on this instance
    pub fn is_local(&self) -> bool {
        self.replica_id == 0
    }
}

/// Everything one transaction writes to the journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Transaction id
    pub txn_id: u64,
    /// Rows in statement order
    pub rows: Vec<RedoRow>,
}

impl JournalEntry {
    /// Entry for a transaction
    pub fn new(txn_id: u64, rows: Vec<RedoRow>) -> Self {
        JournalEntry { txn_id, rows }
    }

    /// Frame the entry as a checksummed record
    pub fn to_record(&self) -> Result<Vec<u8>> {
        let payload = rmp_serde::to_vec(self)?;
        let length = (1 + payload.len() + 4) as u32;
        let mut record = Vec::with_capacity(4 + length as usize);
        record.extend_from_slice(&length.to_le_bytes());
        record.push(JOURNAL_RECORD_FORMAT_VERSION);
        record.extend_from_slice(&payload);
        let mut hasher = Hasher::new();
        hasher.update(&record[4..]);
        record.extend_from_slice(&hasher.finalize().to_le_bytes());
        Ok(record)
    }

    /// Parse one record from the front of `bytes`
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn from_record(bytes: &[u8]) -> Result<(JournalEntry, usize)> {
        if bytes.len() < 4 {
            return Err(Error::Corruption("journal record header truncated".into()));
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if length < 5 || bytes.len() < 4 + length {
            return Err(Error::Corruption(format!(
                "journal record truncated: need {} bytes, have {}",
                4 + length,
                bytes.len()
            )));
        }
        let body = &bytes[4..4 + length - 4];
        let stored_crc = u32::from_le_bytes([
            bytes[4 + length - 4],
            bytes[4 + length - 3],
            bytes[4 + length - 2],
            bytes[4 + length - 1],
        ]);
        let mut hasher = Hasher::new();
        hasher.update(body);
        let computed = hasher.finalize();
        if computed != stored_crc {
            return Err(Error::Corruption(format!(
                "journal record checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed
            )));
        }
        if body[0] != JOURNAL_RECORD_FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported journal record version {}",
                body[0]
            )));
        }
        let entry: JournalEntry = rmp_serde::from_slice(&body[1..])?;
        Ok((entry, 4 + length))
    }
}

/// Sink for committed transactions
///
/// `write` must not return before the entry is durable. It assigns LSNs to
/// local rows and returns the transaction signature (the LSN of the last
/// row).
pub trait Journal {
    /// Persist an entry
    fn write(&mut self, entry: &mut JournalEntry) -> Result<i64>;
}

/// In-memory journal of framed records
#[derive(Debug, Default)]
pub struct MemoryJournal {
    buf: Vec<u8>,
    next_lsn: i64,
    entries: usize,
    fail_writes: usize,
}

impl MemoryJournal {
    /// Empty journal; the first LSN is 1
    pub fn new() -> Self {
        MemoryJournal {
            buf: Vec::new(),
            next_lsn: 1,
            entries: 0,
            fail_writes: 0,
        }
    }

    /// Make the next `n` writes fail with an I/O error
    pub fn fail_next_writes(&mut self, n: usize) {
        self.fail_writes = n;
    }

    /// Number of entries written
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// LSN of the last written local row, 0 if none
    pub fn last_lsn(&self) -> i64 {
        self.next_lsn - 1
    }

    /// Raw record bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Decode and verify every record
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        let mut out = Vec::with_capacity(self.entries);
        let mut pos = 0;
        while pos < self.buf.len() {
            let (entry, used) = JournalEntry::from_record(&self.buf[pos..])?;
            out.push(entry);
            pos += used;
        }
        Ok(out)
    }
}

impl Journal for MemoryJournal {
    fn write(&mut self, entry: &mut JournalEntry) -> Result<i64> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            tracing::warn!(txn_id = entry.txn_id, "journal write failed (injected)");
            return Err(Error::WalIo("injected journal write failure".into()));
        }
        let mut lsn = self.next_lsn;
        let mut signature = self.last_lsn();
        for row in entry.rows.iter_mut() {
            if row.is_local() {
                row.lsn = lsn;
                signature = lsn;
                lsn += 1;
            } else {
                signature = row.lsn;
            }
        }
        let record = entry.to_record()?;
        self.buf.extend_from_slice(&record);
        self.next_lsn = lsn;
        self.entries += 1;
        tracing::trace!(
            txn_id = entry.txn_id,
            rows = entry.rows.len(),
            signature,
            "journal entry written"
        );
        Ok(signature)
    }
}
