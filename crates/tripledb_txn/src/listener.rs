//! Transaction lifecycle notifications.

use crate::types::{TxnId, TxnMode};

/// Observer of transaction lifecycle events.
///
/// Registered with
/// [`TransactionCoordinator::add_listener`](crate::TransactionCoordinator::add_listener)
/// before `start()`. Callbacks run on the thread driving the transaction,
/// outside the admission lock; they must not begin or end transactions on
/// the same coordinator.
pub trait TransactionListener: Send + Sync {
    /// A transaction was admitted.
    fn on_begin(&self, _txn_id: TxnId, _mode: TxnMode) {}

    /// Every component prepared; the journal entry is about to be written.
    fn on_prepare(&self, _txn_id: TxnId, _mode: TxnMode) {}

    /// The transaction committed.
    fn on_commit(&self, _txn_id: TxnId, _mode: TxnMode) {}

    /// The transaction aborted.
    fn on_abort(&self, _txn_id: TxnId, _mode: TxnMode) {}

    /// The transaction ended.
    fn on_end(&self, _txn_id: TxnId, _mode: TxnMode) {}
}
