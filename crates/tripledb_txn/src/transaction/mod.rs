//! Transaction coordination.
//!
//! The coordinator provides:
//! - **Admission**: many READ transactions, at most one WRITE
//! - **Atomicity**: all components commit or none do
//! - **Isolation**: readers never observe a writer's unfinished state
//! - **Durability**: one journal entry per write commit, replayed after a
//!   crash

mod coordinator;
mod handle;

pub use coordinator::TransactionCoordinator;
pub use handle::Transaction;
