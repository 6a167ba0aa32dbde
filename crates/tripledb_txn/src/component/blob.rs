//! Transactional byte value with an optional state file.

use crate::component::cell::VersionedCell;
use crate::component::{ComponentId, TransactionalComponent};
use crate::error::{TxnError, TxnResult};
use crate::journal::compute_crc32;
use crate::transaction::Transaction;
use crate::types::{TxnId, TxnMode};
use parking_lot::Mutex;
use tripledb_storage::StorageBackend;

/// A byte value that takes part in transactions.
///
/// Stands in for structures whose committed state is a single image, such
/// as a B+Tree root block or a prefix table. With a backend attached,
/// `commit` rewrites the state file before the value becomes visible:
///
/// ```text
/// | length u32 | bytes | crc32 u32 |
/// ```
///
/// Rewriting with the same payload yields the same file, so journal replay
/// is idempotent.
pub struct TransBlob {
    id: ComponentId,
    cell: VersionedCell<Vec<u8>>,
    state: Option<Mutex<Box<dyn StorageBackend>>>,
}

impl TransBlob {
    /// Creates an empty blob with no durability of its own.
    #[must_use]
    pub fn in_memory(id: ComponentId) -> Self {
        Self {
            id,
            cell: VersionedCell::new(id, Vec::new()),
            state: None,
        }
    }

    /// Opens a blob persisted in `backend`, loading the last committed value.
    ///
    /// # Errors
    ///
    /// Fails if the state file cannot be read or is damaged.
    pub fn open(id: ComponentId, backend: Box<dyn StorageBackend>) -> TxnResult<Self> {
        let image = backend.read_to_end()?;
        let value = if image.is_empty() {
            Vec::new()
        } else {
            decode_state(id, &image)?
        };
        Ok(Self {
            id,
            cell: VersionedCell::new(id, value),
            state: Some(Mutex::new(backend)),
        })
    }

    /// Value as seen by `txn`.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not active on this blob's coordinator.
    pub fn get(&self, txn: &Transaction) -> TxnResult<Vec<u8>> {
        self.cell.read(txn.id(), |v| v.clone())
    }

    /// Replaces the value inside write transaction `txn`.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not an active write transaction here.
    pub fn set(&self, txn: &Transaction, bytes: &[u8]) -> TxnResult<()> {
        self.cell.write(txn.id(), |v| {
            v.clear();
            v.extend_from_slice(bytes);
        })
    }

    /// Appends to the value inside write transaction `txn`.
    ///
    /// # Errors
    ///
    /// Fails if `txn` is not an active write transaction here.
    pub fn append(&self, txn: &Transaction, bytes: &[u8]) -> TxnResult<()> {
        self.cell.write(txn.id(), |v| v.extend_from_slice(bytes))
    }

    /// Last committed value, outside any transaction.
    #[must_use]
    pub fn committed_value(&self) -> Vec<u8> {
        self.cell.committed()
    }
}

impl std::fmt::Debug for TransBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransBlob")
            .field("id", &self.id)
            .field("persistent", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl TransactionalComponent for TransBlob {
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
        Ok(self.cell.pending(txn_id))
    }

    fn commit(&self, _txn_id: TxnId, payload: Option<&[u8]>) -> TxnResult<()> {
        let Some(payload) = payload else {
            return Ok(());
        };
        if let Some(state) = &self.state {
            state.lock().replace(&encode_state(payload)?)?;
        }
        self.cell.install(payload.to_vec());
        Ok(())
    }

    fn abort(&self, txn_id: TxnId) -> TxnResult<()> {
        self.cell.discard(txn_id);
        Ok(())
    }

    fn complete(&self, txn_id: TxnId) {
        self.cell.discard(txn_id);
    }

    fn shutdown(&self) {
        if let Some(state) = &self.state {
            if let Err(err) = state.lock().sync() {
                tracing::warn!(target: "tripledb::txn", component = %self.id, error = %err, "state file sync failed at shutdown");
            }
        }
    }
}

fn encode_state(value: &[u8]) -> TxnResult<Vec<u8>> {
    let len = u32::try_from(value.len())
        .map_err(|_| TxnError::protocol("blob value exceeds 4 GiB"))?;
    let mut buf = Vec::with_capacity(value.len() + 8);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

fn decode_state(id: ComponentId, image: &[u8]) -> TxnResult<Vec<u8>> {
    let damaged = || TxnError::component(id, "state file is truncated or damaged");
    if image.len() < 8 {
        return Err(damaged());
    }
    let (body, crc_bytes) = image.split_at(image.len() - 4);
    let stored = u32::from_le_bytes(crc_bytes.try_into().map_err(|_| damaged())?);
    let actual = compute_crc32(body);
    if stored != actual {
        return Err(TxnError::ChecksumMismatch {
            expected: stored,
            actual,
        });
    }
    let len = u32::from_le_bytes(body[..4].try_into().map_err(|_| damaged())?) as usize;
    if body.len() != 4 + len {
        return Err(damaged());
    }
    Ok(body[4..].to_vec())
}
