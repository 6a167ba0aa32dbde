//! Transactional in-memory counter.

use crate::component::cell::VersionedCell;
use crate::component::{ComponentId, TransactionalComponent};
use crate::error::{TxnError, TxnResult};
use crate::transaction::Transaction;
use crate::types::{TxnId, TxnMode};

/// An `i64` counter adapted to the commit protocol.
///
/// The counter has no durability of its own. `prepare_commit` snapshots the
/// writer's value, `commit` swaps it in. The payload is the absolute value,
/// so replaying it is idempotent.
///
/// Typical uses are node-id allocators and triple counts kept beside the
/// indexes.
#[derive(Debug)]
pub struct TransCounter {
    id: ComponentId,
    cell: VersionedCell<i64>,
}

impl TransCounter {
    /// Creates a counter starting at `initial`.
    #[must_use]
    pub fn new(id: ComponentId, initial: i64) -> Self {
        Self {
            id,
            cell: VersionedCell::new(id, initial),
        }
    }

    /// Value as seen by `txn`.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not active on this counter's coordinator.
    pub fn get(&self, txn: &Transaction) -> TxnResult<i64> {
        self.cell.read(txn.id(), |v| *v)
    }

    /// Sets the value inside write transaction `txn`.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not an active write transaction here.
    pub fn set(&self, txn: &Transaction, value: i64) -> TxnResult<()> {
        self.cell.write(txn.id(), |v| *v = value)
    }

    /// Adds `delta` inside write transaction `txn`, returning the new value.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not an active write transaction here.
    pub fn add(&self, txn: &Transaction, delta: i64) -> TxnResult<i64> {
        self.cell.write(txn.id(), |v| {
            *v += delta;
            *v
        })
    }

    /// Adds one, returning the new value.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not an active write transaction here.
    pub fn inc(&self, txn: &Transaction) -> TxnResult<i64> {
        self.add(txn, 1)
    }

    /// Last committed value, outside any transaction.
    #[must_use]
    pub fn committed_value(&self) -> i64 {
        self.cell.committed()
    }

    fn decode(&self, payload: &[u8]) -> TxnResult<i64> {
        let bytes: [u8; 8] = payload.try_into().map_err(|_| {
            TxnError::component(
                self.id,
                format!("counter payload must be 8 bytes, got {}", payload.len()),
            )
        })?;
        Ok(i64::from_le_bytes(bytes))
    }
}

impl TransactionalComponent for TransCounter {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn begin(&self, txn_id: TxnId, mode: TxnMode) -> TxnResult<()> {
        self.cell.begin(txn_id, mode);
        Ok(())
    }

    fn promote(&self, txn_id: TxnId, read_committed: bool) -> TxnResult<()> {
        self.cell.promote(txn_id, read_committed)
    }

    fn prepare_commit(&self, txn_id: TxnId) -> TxnResult<Option<Vec<u8>>> {
        Ok(self
            .cell
            .pending(txn_id)
            .map(|value| value.to_le_bytes().to_vec()))
    }

    fn commit(&self, _txn_id: TxnId, payload: Option<&[u8]>) -> TxnResult<()> {
        if let Some(payload) = payload {
            let value = self.decode(payload)?;
            self.cell.install(value);
        }
        Ok(())
    }

    fn abort(&self, txn_id: TxnId) -> TxnResult<()> {
        self.cell.discard(txn_id);
        Ok(())
    }

    fn complete(&self, txn_id: TxnId) {
        self.cell.discard(txn_id);
    }
}
