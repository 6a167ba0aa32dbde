//! Streaming journal reader.
//!
//! Reads records one at a time from the backend so recovery of a large
//! journal (entries kept after a failed finalize) does not load it whole.

use crate::error::{TxnError, TxnResult};
use crate::journal::entry::{
    compute_crc32, JournalEntry, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_VERSION,
};
use parking_lot::MutexGuard;
use tripledb_storage::StorageBackend;

/// An iterator over journal entries, yielding `(offset, entry)` pairs.
///
/// # Error Handling
///
/// - A header or record cut short at the tail ends iteration cleanly: the
///   writer crashed mid-append and that transaction never committed
/// - Bad magic, an unknown version, a CRC mismatch or a malformed payload
///   yield an error and end iteration
pub struct JournalReader<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> JournalReader<'a> {
    /// Creates a reader starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub(crate) fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> TxnResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset,
            finished: false,
        })
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    fn read_next(&mut self) -> TxnResult<Option<(u64, JournalEntry)>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            self.log_torn_tail();
            return Ok(None);
        }

        let header = self.backend.read_at(self.offset, HEADER_SIZE)?;
        if header[0..4] != JOURNAL_MAGIC {
            return Err(TxnError::journal_corruption(format!(
                "invalid magic at offset {}",
                self.offset
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != JOURNAL_VERSION {
            return Err(TxnError::journal_corruption(format!(
                "unsupported journal version {version} at offset {}",
                self.offset
            )));
        }
        let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let record_len = HEADER_SIZE + len + CRC_SIZE;
        if remaining < record_len as u64 {
            self.log_torn_tail();
            return Ok(None);
        }

        let record = self.backend.read_at(self.offset, record_len)?;
        let (body, crc_bytes) = record.split_at(HEADER_SIZE + len);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = compute_crc32(body);
        if stored != actual {
            return Err(TxnError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let entry = JournalEntry::decode_payload(&body[HEADER_SIZE..])?;
        let at = self.offset;
        self.offset += record_len as u64;
        Ok(Some((at, entry)))
    }

    fn log_torn_tail(&self) {
        tracing::warn!(
            target: "tripledb::journal",
            offset = self.offset,
            bytes = self.remaining(),
            "ignoring incomplete journal record at tail"
        );
    }
}

impl Iterator for JournalReader<'_> {
    type Item = TxnResult<(u64, JournalEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
