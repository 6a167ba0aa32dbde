//! Per-transaction views over one committed value.

use crate::component::ComponentId;
use crate::error::{TxnError, TxnResult};
use crate::types::{TxnId, TxnMode};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// A committed value plus one private view per live transaction.
///
/// Readers get a snapshot at `begin` and never observe a writer's working
/// copy; the writer's copy replaces the committed value only on finalize.
#[derive(Debug)]
pub(crate) struct VersionedCell<V> {
    component: ComponentId,
    committed: RwLock<V>,
    views: Mutex<HashMap<TxnId, View<V>>>,
}

#[derive(Debug)]
struct View<V> {
    mode: TxnMode,
    value: V,
    dirty: bool,
}

impl<V: Clone> VersionedCell<V> {
    pub(crate) fn new(component: ComponentId, initial: V) -> Self {
        Self {
            component,
            committed: RwLock::new(initial),
            views: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn begin(&self, txn_id: TxnId, mode: TxnMode) {
        let value = self.committed.read().clone();
        self.views.lock().insert(
            txn_id,
            View {
                mode,
                value,
                dirty: false,
            },
        );
    }

    pub(crate) fn read<R>(&self, txn_id: TxnId, f: impl FnOnce(&V) -> R) -> TxnResult<R> {
        let views = self.views.lock();
        let view = views.get(&txn_id).ok_or_else(|| self.unknown(txn_id))?;
        Ok(f(&view.value))
    }

    pub(crate) fn write<R>(&self, txn_id: TxnId, f: impl FnOnce(&mut V) -> R) -> TxnResult<R> {
        let mut views = self.views.lock();
        let view = views.get_mut(&txn_id).ok_or_else(|| self.unknown(txn_id))?;
        if view.mode != TxnMode::Write {
            return Err(TxnError::component(
                self.component,
                format!("{txn_id} is a read transaction"),
            ));
        }
        view.dirty = true;
        Ok(f(&mut view.value))
    }

    /// Turns the view of `txn_id` into a writable one, restarting it from
    /// the committed value if `refresh`.
    pub(crate) fn promote(&self, txn_id: TxnId, refresh: bool) -> TxnResult<()> {
        let mut views = self.views.lock();
        let view = views.get_mut(&txn_id).ok_or_else(|| self.unknown(txn_id))?;
        view.mode = TxnMode::Write;
        if refresh {
            view.value = self.committed.read().clone();
        }
        Ok(())
    }

    /// The working copy of `txn_id` if it changed anything.
    pub(crate) fn pending(&self, txn_id: TxnId) -> Option<V> {
        self.views
            .lock()
            .get(&txn_id)
            .filter(|view| view.dirty)
            .map(|view| view.value.clone())
    }

    pub(crate) fn install(&self, value: V) {
        *self.committed.write() = value;
    }

    pub(crate) fn discard(&self, txn_id: TxnId) {
        self.views.lock().remove(&txn_id);
    }

    pub(crate) fn committed(&self) -> V {
        self.committed.read().clone()
    }

    fn unknown(&self, txn_id: TxnId) -> TxnError {
        TxnError::component(
            self.component,
            format!("{txn_id} is not active on this component"),
        )
    }
}
