//! The transaction handle.

use crate::error::{TxnError, TxnResult};
use crate::transaction::coordinator::{CoordinatorInner, Promotion};
use crate::types::{DataVersion, TxnId, TxnMode, TxnState};
use std::fmt;
use std::sync::Arc;

/// A unit of work admitted by a [`crate::TransactionCoordinator`].
///
/// Obtained from `begin` already active. The state only moves forward:
///
/// ```text
/// Active ──commit──▶ Committed ──end──▶ Ended
///    └────abort───▶ Aborted  ──end──▶ Ended
/// ```
///
/// A second `commit` or `abort` is a protocol error that leaves the state
/// alone, so `end` still cleans up. `end` is the only call that may be
/// repeated. A WRITE transaction must commit or abort before `end`.
///
/// Dropping an active transaction aborts it.
pub struct Transaction {
    coordinator: Arc<CoordinatorInner>,
    id: TxnId,
    mode: TxnMode,
    data_version: DataVersion,
    state: TxnState,
}

impl Transaction {
    pub(crate) fn new(
        coordinator: Arc<CoordinatorInner>,
        id: TxnId,
        mode: TxnMode,
        data_version: DataVersion,
    ) -> Self {
        Self {
            coordinator,
            id,
            mode,
            data_version,
            state: TxnState::Inactive,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the mode.
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Version of the committed data this transaction works from.
    ///
    /// The version at `begin`, or the latest one for a transaction
    /// promoted with read-committed promotion.
    #[must_use]
    pub fn data_version(&self) -> DataVersion {
        self.data_version
    }

    /// Whether the transaction can still commit or abort.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Whether this is a WRITE transaction.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.mode == TxnMode::Write
    }

    /// Marks a freshly admitted transaction active.
    ///
    /// # Errors
    ///
    /// A handle is begun once, by the coordinator; any further call is a
    /// protocol error.
    pub fn begin(&mut self) -> TxnResult<()> {
        match self.state {
            TxnState::Inactive => {
                self.state = TxnState::Active;
                Ok(())
            }
            TxnState::Active => Err(TxnError::protocol(format!(
                "{} is already active",
                self.id
            ))),
            TxnState::Committed | TxnState::Aborted | TxnState::Ended => Err(
                TxnError::protocol(format!("{} has finished and cannot begin again", self.id)),
            ),
        }
    }

    /// Promotes an active READ transaction to WRITE.
    ///
    /// Waits for the writer slot. Returns `Ok(false)`, leaving the
    /// transaction an active reader, if a write committed after it began
    /// (unless [`Config::read_committed_promotion`](crate::Config) is set)
    /// or if an exclusive-mode request is queued ahead of it. A WRITE
    /// transaction is already promoted and returns `Ok(true)`.
    ///
    /// # Errors
    ///
    /// - protocol error if the transaction is not active
    /// - [`TxnError::Shutdown`] if shutdown begins while waiting
    /// - a component failure from its `promote`; the transaction is then
    ///   aborted
    pub fn promote(&mut self) -> TxnResult<bool> {
        self.check_can_finish("promote")?;
        if self.mode == TxnMode::Write {
            return Ok(true);
        }
        match self.coordinator.promote_txn(self.id, self.data_version)? {
            Promotion::Granted(version) => {
                self.mode = TxnMode::Write;
                self.data_version = version;
                Ok(true)
            }
            Promotion::Refused => Ok(false),
            Promotion::Failed(err) => {
                self.coordinator.abort_txn(self.id, self.mode);
                self.state = TxnState::Aborted;
                Err(err)
            }
        }
    }

    /// Commits the transaction.
    ///
    /// For a WRITE this runs prepare, journal append and finalize on every
    /// component. For a READ it only releases the transaction.
    ///
    /// # Errors
    ///
    /// - protocol error if the transaction is not active
    /// - [`TxnError::PrepareFailed`] if a component could not prepare; the
    ///   transaction is then aborted
    /// - storage errors from the journal append; the transaction is then
    ///   aborted
    pub fn commit(&mut self) -> TxnResult<()> {
        self.check_can_finish("commit")?;
        match self.coordinator.commit_txn(self.id, self.mode) {
            Ok(()) => {
                self.state = TxnState::Committed;
                Ok(())
            }
            Err(err) => {
                self.state = TxnState::Aborted;
                Err(err)
            }
        }
    }

    /// Aborts the transaction, discarding its changes.
    ///
    /// # Errors
    ///
    /// Protocol error if the transaction is not active.
    pub fn abort(&mut self) -> TxnResult<()> {
        self.check_can_finish("abort")?;
        self.coordinator.abort_txn(self.id, self.mode);
        self.state = TxnState::Aborted;
        Ok(())
    }

    /// Ends the transaction. Safe to call more than once.
    ///
    /// An active READ is released as if committed.
    ///
    /// # Errors
    ///
    /// Protocol error for an active WRITE: it must commit or abort first,
    /// and stays active.
    pub fn end(&mut self) -> TxnResult<()> {
        match self.state {
            TxnState::Ended => return Ok(()),
            TxnState::Active if self.mode == TxnMode::Write => {
                return Err(TxnError::protocol(format!(
                    "{} is a write transaction; commit or abort before end",
                    self.id
                )));
            }
            TxnState::Active => self.coordinator.finish_read(self.id),
            TxnState::Inactive | TxnState::Committed | TxnState::Aborted => {}
        }
        let begun = self.state != TxnState::Inactive;
        self.state = TxnState::Ended;
        if begun {
            self.coordinator.ended(self.id, self.mode);
        }
        Ok(())
    }

    fn check_can_finish(&self, action: &str) -> TxnResult<()> {
        let problem = match self.state {
            TxnState::Active => return Ok(()),
            TxnState::Inactive => "has not begun",
            TxnState::Committed => "is already committed",
            TxnState::Aborted => "is already aborted",
            TxnState::Ended => "has ended",
        };
        Err(TxnError::protocol(format!(
            "cannot {action}: {} {problem}",
            self.id
        )))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            tracing::warn!(
                target: "tripledb::txn",
                txn_id = %self.id,
                mode = %self.mode,
                "transaction dropped while active, aborting"
            );
            self.coordinator.abort_txn(self.id, self.mode);
            self.state = TxnState::Aborted;
        }
        if let Err(err) = self.end() {
            tracing::warn!(target: "tripledb::txn", txn_id = %self.id, error = %err, "end on drop failed");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("data_version", &self.data_version)
            .finish_non_exhaustive()
    }
}
