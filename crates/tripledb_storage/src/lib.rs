//! # TripleDB Storage
//!
//! Byte stores underneath the transaction journal and the durable
//! transactional components (term tables, index roots, counters).
//!
//! A backend never interprets what it holds: the journal owns its record
//! framing, each component owns its state-file format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral coordinators and tests; clones share
//!   the same bytes, so a test can "reopen" a store after dropping its owner
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tripledb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"journal bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"journal");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
