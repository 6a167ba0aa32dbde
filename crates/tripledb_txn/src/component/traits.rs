//! The component side of the commit protocol.

use crate::component::ComponentId;
use crate::error::TxnResult;
use crate::types::{TxnId, TxnMode};

/// A storage structure that takes part in coordinated transactions.
///
/// Each component is registered with exactly one
/// [`crate::TransactionCoordinator`] for its lifetime and is only ever
/// driven by that coordinator. Internally it may use any concurrency
/// strategy, as long as the calls below keep their meaning.
///
/// # Write commit sequence
///
/// For a WRITE transaction the coordinator calls, for every component:
///
/// 1. [`prepare_commit`](Self::prepare_commit) - produce the durable bytes
///    of the change-set without changing externally visible state
/// 2. (the coordinator appends all payloads as one journal entry)
/// 3. [`commit`](Self::commit) - make the change visible and durable
/// 4. [`complete`](Self::complete) - drop transaction-scoped resources
///
/// If any prepare fails, every component gets [`abort`](Self::abort) and
/// then `complete`, and nothing reaches the journal.
///
/// # Idempotent replay
///
/// `commit` with a payload must be idempotent: applying the same payload
/// again, any number of times, leaves the same state as applying it once.
/// Crash recovery relies on this. On `start()` every journal entry that
/// may not have been finalized is fed back through `commit`, for a
/// transaction id this component may never have seen `begin` for.
/// Payloads therefore describe resulting state (or carry enough to detect
/// re-application), never a bare delta.
pub trait TransactionalComponent: Send + Sync {
    /// Identity used to key journal entries.
    fn component_id(&self) -> ComponentId;

    /// Called by `start()` when the journal holds nothing to recover.
    fn clean_start(&self) {}

    /// Called by `start()` before any journal entry is replayed.
    fn start_recovery(&self) {}

    /// Called by `start()` after all journal entries were replayed.
    fn finish_recovery(&self) {}

    /// A transaction was admitted.
    ///
    /// Called for every component, for readers and writers, serialized
    /// against commit finalization: all components of one transaction see
    /// the same committed state.
    ///
    /// # Errors
    ///
    /// A failure makes the `begin` fail and the transaction is not admitted.
    fn begin(&self, txn_id: TxnId, mode: TxnMode) -> TxnResult<()>;

    /// A READ transaction became the writer.
    ///
    /// Called with the writer slot held, serialized against commit
    /// finalization. With `read_committed` the transaction moves to the
    /// latest committed state; otherwise the committed state is still the
    /// one it began from.
    ///
    /// # Errors
    ///
    /// A failure refuses the promotion and aborts the transaction.
    fn promote(&self, txn_id: TxnId, read_committed: bool) -> TxnResult<()> {
        let _ = (txn_id, read_committed);
        Ok(())
    }

    /// Phase one of a write commit.
    ///
    /// Returns the durable bytes of this component's change-set, or `None`
    /// when the transaction changed nothing here.
    ///
    /// # Errors
    ///
    /// Any failure aborts the whole transaction.
    fn prepare_commit(&self, txn_id: TxnId) -> TxnResult<Option<Vec<u8>>>;

    /// Phase two: finalize.
    ///
    /// Called only after the journal durably holds `payload`. `None` means
    /// `prepare_commit` returned `None`. Must be idempotent per payload,
    /// see the trait documentation.
    ///
    /// # Errors
    ///
    /// A failure here is logged by the coordinator and repaired by replay
    /// on the next `start()`.
    fn commit(&self, txn_id: TxnId, payload: Option<&[u8]>) -> TxnResult<()>;

    /// Discards any change-set of the transaction.
    ///
    /// # Errors
    ///
    /// Failures are logged; the abort still completes.
    fn abort(&self, txn_id: TxnId) -> TxnResult<()>;

    /// Releases transaction-scoped resources once commit or abort finished.
    fn complete(&self, txn_id: TxnId);

    /// The owning coordinator is shutting down.
    fn shutdown(&self) {}
}

/// Chooses the components a new transaction takes part in.
///
/// Components left out see no `begin`, `commit` or `abort` for that
/// transaction. Returning `None` selects every registered component.
///
/// Any `Fn(TxnMode) -> Option<Vec<ComponentId>>` closure is a selector.
pub trait ComponentSelector: Send + Sync {
    /// Component ids for a transaction in `mode`.
    fn select(&self, mode: TxnMode) -> Option<Vec<ComponentId>>;
}

impl<F> ComponentSelector for F
where
    F: Fn(TxnMode) -> Option<Vec<ComponentId>> + Send + Sync,
{
    fn select(&self, mode: TxnMode) -> Option<Vec<ComponentId>> {
        self(mode)
    }
}
