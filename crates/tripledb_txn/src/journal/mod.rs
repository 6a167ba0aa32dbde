//! Write-ahead journal of committed write transactions.
//!
//! Every write commit appends exactly one [`JournalEntry`] after all
//! components prepared and before any of them finalizes. Once every
//! component finalized, the coordinator resets the journal to empty, so in
//! steady state it holds at most the entry being committed.
//!
//! ## Record Format
//!
//! ```text
//! | magic "TJNL" (4) | version u16 (2) | length u32 (4) | payload | crc32 (4) |
//! ```
//!
//! Payload:
//!
//! ```text
//! | txn_id u64 | count u32 | count × (component id (16) | len u32 | bytes) |
//! ```
//!
//! All integers are little-endian.

mod entry;
mod reader;

pub use entry::{compute_crc32, JournalEntry, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use reader::JournalReader;

use crate::error::TxnResult;
use parking_lot::Mutex;
use std::path::Path;
use tripledb_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Append-only journal over a [`StorageBackend`].
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl Journal {
    /// Creates a journal over `backend`.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Creates a journal that does not survive the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryBackend::new()))
    }

    /// Opens (or creates) a file-backed journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_file(path: &Path) -> TxnResult<Self> {
        Ok(Self::new(Box::new(FileBackend::open(path)?)))
    }

    /// Appends `entry`, returning the offset it was written at.
    ///
    /// The record is handed to the backend in a single append; call
    /// [`Journal::sync`] or [`Journal::flush`] to make it durable.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append(&self, entry: &JournalEntry) -> TxnResult<u64> {
        let data = entry.encode_record()?;
        let offset = self.backend.lock().append(&data)?;
        Ok(offset)
    }

    /// Returns a streaming reader over all entries.
    ///
    /// The reader holds the journal lock until dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> TxnResult<JournalReader<'_>> {
        JournalReader::new(self.backend.lock(), 0)
    }

    /// Reads all entries.
    ///
    /// # Errors
    ///
    /// Returns the first corruption or I/O error encountered.
    pub fn entries(&self) -> TxnResult<Vec<JournalEntry>> {
        self.iter()?
            .map(|item| item.map(|(_, entry)| entry))
            .collect()
    }

    /// Cuts the journal back to `offset`, dropping every record from there.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation or the sync fails.
    pub fn truncate(&self, offset: u64) -> TxnResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(offset)?;
        backend.sync()?;
        Ok(())
    }

    /// Discards every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation or the sync fails.
    pub fn reset(&self) -> TxnResult<()> {
        self.truncate(0)
    }

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> TxnResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Forces the journal to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> TxnResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> TxnResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Whether the journal holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn is_empty(&self) -> TxnResult<bool> {
        Ok(self.size()? == 0)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}
