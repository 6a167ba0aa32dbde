//! # TripleDB Transaction Core
//!
//! Multi-version transaction coordination for the TripleDB storage engine.
//!
//! This crate provides:
//! - [`TransactionCoordinator`]: admission of readers and writers, two-phase
//!   commit across independently persisted components, writer blocking and
//!   exclusive mode
//! - [`TransactionalComponent`]: the contract a term table, index or
//!   counter implements to take part in coordinated commit
//! - [`Journal`]: the write-ahead journal replayed on start
//! - [`ThreadTxn`]: a unit of work run on another thread
//! - [`ParallelLoader`]: bulk loading through per-worker coordinators
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tripledb_txn::{ComponentId, TransCounter, TransactionCoordinator};
//!
//! let coordinator = TransactionCoordinator::in_memory();
//! let triples = Arc::new(TransCounter::new(ComponentId::named("triples"), 0));
//! coordinator.add(triples.clone()).unwrap();
//! coordinator.start().unwrap();
//!
//! coordinator
//!     .execute_write(|txn| triples.add(txn, 3))
//!     .unwrap();
//! let seen = coordinator.execute_read(|txn| triples.get(txn)).unwrap();
//! assert_eq!(seen.unwrap(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod component;
mod config;
mod dir;
mod error;
mod journal;
mod listener;
mod thread;
mod transaction;
mod types;

pub use bulk::{LoadSummary, LoaderWorker, ParallelLoader};
pub use component::{
    ComponentId, ComponentSelector, TransBlob, TransCounter, TransactionalComponent,
};
pub use config::Config;
pub use dir::JournalDir;
pub use error::{TxnError, TxnResult};
pub use journal::{compute_crc32, Journal, JournalEntry, JournalReader, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use listener::TransactionListener;
pub use thread::ThreadTxn;
pub use transaction::{Transaction, TransactionCoordinator};
pub use types::{DataVersion, TxnId, TxnMode, TxnState};
