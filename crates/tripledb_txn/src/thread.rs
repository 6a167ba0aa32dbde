//! Running a unit of work on another thread.
//!
//! A [`ThreadTxn`] spawns a named thread that performs its setup step
//! (typically `begin`) immediately, then parks until the owner calls
//! [`ThreadTxn::start`] or [`ThreadTxn::run`]. This lets a test pin down
//! exactly when a transaction on another thread begins relative to work on
//! the current one:
//!
//! ```rust,ignore
//! let mut writer = coordinator.begin_write()?;
//! counter.inc(&writer)?;
//! // The reader begins now, before the writer commits.
//! let reader = ThreadTxn::read(&coordinator, move |txn| counter.get(txn))?;
//! writer.commit()?;
//! writer.end()?;
//! assert_eq!(reader.run()?, 3);
//! ```

use crate::error::{TxnError, TxnResult};
use crate::transaction::{Transaction, TransactionCoordinator};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

/// A single-shot unit of work on its own thread.
///
/// Dropping it before it ran cancels the work: the setup is undone (an
/// open transaction is aborted) and the thread is joined.
pub struct ThreadTxn<T> {
    name: String,
    go: Option<SyncSender<bool>>,
    handle: Option<JoinHandle<TxnResult<T>>>,
}

impl<T: Send + 'static> ThreadTxn<T> {
    /// Spawns a thread that runs `before` now, then waits for the signal to
    /// run `action`, or `cancel` if dropped first.
    ///
    /// Returns once `before` has finished.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn<S, B, A, C>(name: impl Into<String>, before: B, action: A, cancel: C) -> TxnResult<Self>
    where
        B: FnOnce() -> TxnResult<S> + Send + 'static,
        A: FnOnce(S) -> TxnResult<T> + Send + 'static,
        C: FnOnce(S) + Send + 'static,
    {
        let name = name.into();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<()>(1);
        let (go_tx, go_rx) = mpsc::sync_channel::<bool>(1);
        let task_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let prepared = before();
            // The owner may already be gone; it then never waits on this.
            let _ = ready_tx.send(());
            let go = go_rx.recv().unwrap_or(false);
            let state = prepared?;
            if go {
                action(state)
            } else {
                cancel(state);
                Err(TxnError::TaskCancelled { name: task_name })
            }
        })?;

        // A panic in `before` drops the sender; the panic surfaces on join.
        let _ = ready_rx.recv();

        Ok(Self {
            name,
            go: Some(go_tx),
            handle: Some(handle),
        })
    }

    /// Runs `action` on a thread with no transaction around it.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn execute<F>(name: impl Into<String>, action: F) -> TxnResult<Self>
    where
        F: FnOnce() -> TxnResult<T> + Send + 'static,
    {
        Self::spawn(name, || Ok(()), move |()| action(), |()| {})
    }

    /// Begins a READ transaction on a new thread now; `action` runs inside
    /// it when started, then the transaction ends.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned. A failed `begin` is reported
    /// by [`run`](Self::run).
    pub fn read<F>(coordinator: &TransactionCoordinator, action: F) -> TxnResult<Self>
    where
        F: FnOnce(&Transaction) -> TxnResult<T> + Send + 'static,
    {
        let coordinator = coordinator.clone();
        let name = format!("{}-read", coordinator.config().thread_name_prefix);
        Self::spawn(
            name,
            move || coordinator.begin_read(),
            move |mut txn: Transaction| {
                let result = action(&txn);
                txn.commit()?;
                txn.end()?;
                result
            },
            abandon,
        )
    }

    /// Begins a WRITE transaction on a new thread now; `action` runs inside
    /// it when started, then the transaction commits if `action` succeeded
    /// and aborts otherwise.
    ///
    /// The `begin` waits for the writer slot, so the constructor blocks
    /// while another writer is active.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn write<F>(coordinator: &TransactionCoordinator, action: F) -> TxnResult<Self>
    where
        F: FnOnce(&Transaction) -> TxnResult<T> + Send + 'static,
    {
        let coordinator = coordinator.clone();
        let name = format!("{}-write", coordinator.config().thread_name_prefix);
        Self::spawn(
            name,
            move || coordinator.begin_write(),
            move |mut txn: Transaction| {
                let result = action(&txn);
                if result.is_ok() {
                    txn.commit()?;
                } else {
                    txn.abort()?;
                }
                txn.end()?;
                result
            },
            abandon,
        )
    }

    /// Like [`write`](Self::write) but always aborts after `action`.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn write_abort<F>(coordinator: &TransactionCoordinator, action: F) -> TxnResult<Self>
    where
        F: FnOnce(&Transaction) -> TxnResult<T> + Send + 'static,
    {
        let coordinator = coordinator.clone();
        let name = format!("{}-write", coordinator.config().thread_name_prefix);
        Self::spawn(
            name,
            move || coordinator.begin_write(),
            move |mut txn: Transaction| {
                let result = action(&txn);
                txn.abort()?;
                txn.end()?;
                result
            },
            abandon,
        )
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lets the action run without waiting for it.
    pub fn start(&mut self) {
        if let Some(go) = self.go.take() {
            let _ = go.send(true);
        }
    }

    /// Runs the action (if not yet started) and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the action's error, or [`TxnError::TaskPanicked`] if the
    /// thread panicked.
    pub fn run(mut self) -> TxnResult<T> {
        self.start();
        self.join()
    }

    fn join(&mut self) -> TxnResult<T> {
        let Some(handle) = self.handle.take() else {
            return Err(TxnError::TaskCancelled {
                name: self.name.clone(),
            });
        };
        handle.join().map_err(|_| TxnError::TaskPanicked {
            name: self.name.clone(),
        })?
    }
}

impl<T> Drop for ThreadTxn<T> {
    fn drop(&mut self) {
        if let Some(go) = self.go.take() {
            let _ = go.send(false);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(target: "tripledb::txn", task = %self.name, "cancelled task panicked");
            }
        }
    }
}

fn abandon(mut txn: Transaction) {
    if let Err(err) = txn.abort().and_then(|()| txn.end()) {
        tracing::warn!(target: "tripledb::txn", txn_id = %txn.id(), error = %err, "cancelling transaction failed");
    }
}
