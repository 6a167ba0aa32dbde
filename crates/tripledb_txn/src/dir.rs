//! Journal directory management.
//!
//! A file-backed coordinator owns one directory:
//!
//! ```text
//! <dir>/
//! ├─ LOCK            # Advisory lock, one coordinator per directory
//! ├─ journal.jrnl    # Write-ahead journal
//! └─ <name>.dat      # Component state files (optional)
//! ```

use crate::error::{TxnError, TxnResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.jrnl";
const COMPONENT_EXT: &str = "dat";

/// A locked journal directory.
///
/// The lock is held until this value is dropped, which the coordinator
/// does on `shutdown()` or `release()`.
#[derive(Debug)]
pub struct JournalDir {
    path: PathBuf,
    lock_file: File,
}

impl JournalDir {
    /// Opens `path` and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory is missing and `create_if_missing` is false
    /// - the path is not a directory
    /// - another coordinator holds the lock (`LocationLocked`)
    pub fn open(path: &Path, create_if_missing: bool) -> TxnResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(TxnError::invalid_location(format!(
                    "journal directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(TxnError::invalid_location(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(TxnError::LocationLocked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_file,
        })
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Path of the state file for a component called `name`.
    #[must_use]
    pub fn component_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{COMPONENT_EXT}"))
    }
}

impl Drop for JournalDir {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.lock_file) {
            tracing::debug!(
                target: "tripledb::journal",
                path = %self.path.display(),
                error = %err,
                "failed to release journal directory lock"
            );
        }
    }
}
