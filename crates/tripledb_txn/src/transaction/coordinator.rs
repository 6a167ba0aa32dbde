//! Transaction coordinator.

use crate::component::{ComponentId, ComponentSelector, TransactionalComponent};
use crate::config::Config;
use crate::dir::JournalDir;
use crate::error::{TxnError, TxnResult};
use crate::journal::{Journal, JournalEntry};
use crate::listener::TransactionListener;
use crate::transaction::handle::Transaction;
use crate::types::{DataVersion, TxnId, TxnMode};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Admits readers and writers over a set of components and drives the
/// commit protocol across them.
///
/// The coordinator provides:
/// - any number of concurrent READ transactions, at most one WRITE
/// - atomic commit across every registered component, journaled before
///   any component finalizes
/// - crash recovery by journal replay on [`start`](Self::start)
/// - writer blocking and exclusive mode for bulk operations
///
/// ## Lifecycle
///
/// Register components with [`add`](Self::add), then call `start`. After
/// that the component set is fixed. [`shutdown`](Self::shutdown) waits for
/// active transactions and shuts the components down;
/// [`release`](Self::release) does the same but leaves the components
/// running, for coordinators that borrow components owned elsewhere.
///
/// ## Fairness
///
/// Requests that wait (blocking WRITE begins, `block_writers`, blocking
/// exclusive mode) queue in arrival order. While an exclusive-mode request
/// waits, no new transaction of either mode is admitted. Non-blocking
/// requests never overtake a queued request. A reader promoting to WRITE
/// queues like a blocking writer, but gives up if an exclusive-mode request
/// is ahead of it, since that request waits for the reader to end.
///
/// The handle is cheap to clone; clones drive the same coordinator.
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<CoordinatorInner>,
}

pub(crate) struct CoordinatorInner {
    config: Config,
    journal: Journal,
    location: Mutex<Option<JournalDir>>,
    setup: RwLock<Setup>,
    hooks: Mutex<Vec<ShutdownHook>>,
    admission: Mutex<Admission>,
    changed: Condvar,
    /// Serializes component `begin` against commit finalization.
    switch: Mutex<()>,
    data_version: AtomicU64,
    /// Journal entries exist whose finalization failed.
    journal_outstanding: AtomicBool,
    /// Components taking part in each live transaction.
    participants: Mutex<HashMap<TxnId, Vec<Arc<dyn TransactionalComponent>>>>,
}

#[derive(Default)]
struct Setup {
    components: Vec<Arc<dyn TransactionalComponent>>,
    listeners: Vec<Arc<dyn TransactionListener>>,
    selector: Option<Arc<dyn ComponentSelector>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configuring,
    Starting,
    Running,
    ShuttingDown,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitKind {
    Writer,
    BlockWriters,
    Exclusive,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    kind: WaitKind,
}

/// Outcome of promoting a READ transaction.
#[derive(Debug)]
pub(crate) enum Promotion {
    /// Now the writer, working from this data version.
    Granted(DataVersion),
    /// Still an active reader.
    Refused,
    /// A component rejected the promotion; the transaction must abort.
    Failed(TxnError),
}

#[derive(Debug, Default)]
struct Counters {
    begin: u64,
    begin_read: u64,
    begin_write: u64,
    promoted: u64,
    finished: u64,
}

/// Everything admission decisions read, mutated only under one lock.
#[derive(Debug)]
struct Admission {
    phase: Phase,
    next_txn_id: u64,
    active: HashMap<TxnId, TxnMode>,
    active_writer: Option<TxnId>,
    writers_blocked: bool,
    exclusive: bool,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    counters: Counters,
}

impl Admission {
    fn new() -> Self {
        Self {
            phase: Phase::Configuring,
            next_txn_id: 1,
            active: HashMap::new(),
            active_writer: None,
            writers_blocked: false,
            exclusive: false,
            queue: VecDeque::new(),
            next_ticket: 0,
            counters: Counters::default(),
        }
    }

    fn check_running(&self) -> TxnResult<()> {
        match self.phase {
            Phase::Running => Ok(()),
            Phase::Configuring | Phase::Starting => Err(TxnError::NotStarted),
            Phase::ShuttingDown | Phase::Shutdown => Err(TxnError::Shutdown),
        }
    }

    fn exclusive_queued(&self) -> bool {
        self.queue.iter().any(|w| w.kind == WaitKind::Exclusive)
    }

    fn readers_admissible(&self) -> bool {
        !self.exclusive && !self.exclusive_queued()
    }

    fn writer_slot_free(&self) -> bool {
        self.active_writer.is_none() && !self.writers_blocked
    }

    fn enqueue(&mut self, kind: WaitKind) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(Waiter { ticket, kind });
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        self.queue.retain(|w| w.ticket != ticket);
    }

    fn is_front(&self, ticket: u64) -> bool {
        self.queue.front().is_some_and(|w| w.ticket == ticket)
    }

    fn exclusive_queued_ahead(&self, ticket: u64) -> bool {
        self.queue
            .iter()
            .take_while(|w| w.ticket != ticket)
            .any(|w| w.kind == WaitKind::Exclusive)
    }

    fn register(&mut self, mode: TxnMode) -> TxnId {
        let id = TxnId::new(self.next_txn_id);
        self.next_txn_id += 1;
        self.active.insert(id, mode);
        self.counters.begin += 1;
        match mode {
            TxnMode::Read => self.counters.begin_read += 1,
            TxnMode::Write => {
                self.counters.begin_write += 1;
                self.active_writer = Some(id);
            }
        }
        id
    }

    /// Removes `id` from the registry; false if it was already gone.
    fn unregister(&mut self, id: TxnId) -> bool {
        if self.active.remove(&id).is_none() {
            return false;
        }
        if self.active_writer == Some(id) {
            self.active_writer = None;
        }
        self.counters.finished += 1;
        true
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator over `journal` with default configuration.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self::with_config(journal, Config::default())
    }

    /// Creates a coordinator over `journal`.
    #[must_use]
    pub fn with_config(journal: Journal, config: Config) -> Self {
        Self::build(journal, config, None)
    }

    /// Creates a coordinator whose journal lives in memory.
    ///
    /// Used for ephemeral datasets, tests and per-worker bulk-load
    /// coordinators.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Journal::in_memory())
    }

    /// Opens a file-backed coordinator in directory `dir`.
    ///
    /// Takes the directory lock and opens `journal.jrnl`; replay happens on
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be used or another coordinator holds
    /// it.
    pub fn open(dir: &Path, config: Config) -> TxnResult<Self> {
        let location = JournalDir::open(dir, config.create_if_missing)?;
        let journal = Journal::open_file(&location.journal_path())?;
        info!(
            target: "tripledb::txn",
            path = %location.path().display(),
            "opened journal directory"
        );
        Ok(Self::build(journal, config, Some(location)))
    }

    fn build(journal: Journal, config: Config, location: Option<JournalDir>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                journal,
                location: Mutex::new(location),
                setup: RwLock::new(Setup::default()),
                hooks: Mutex::new(Vec::new()),
                admission: Mutex::new(Admission::new()),
                changed: Condvar::new(),
                switch: Mutex::new(()),
                data_version: AtomicU64::new(0),
                journal_outstanding: AtomicBool::new(false),
                participants: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Directory of a file-backed coordinator, until shutdown.
    #[must_use]
    pub fn location(&self) -> Option<PathBuf> {
        self.inner
            .location
            .lock()
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
    }

    /// Conventional state-file path for component `name` next to the
    /// journal, for file-backed coordinators.
    #[must_use]
    pub fn component_path(&self, name: &str) -> Option<PathBuf> {
        self.inner
            .location
            .lock()
            .as_ref()
            .map(|dir| dir.component_path(name))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Registers a component.
    ///
    /// # Errors
    ///
    /// - [`TxnError::ConfigurationLocked`] after `start()`
    /// - [`TxnError::DuplicateComponent`] if the id is already registered
    pub fn add(&self, component: Arc<dyn TransactionalComponent>) -> TxnResult<()> {
        let adm = self.inner.admission.lock();
        check_configuring(adm.phase)?;
        let id = component.component_id();
        let mut setup = self.inner.setup.write();
        if setup.components.iter().any(|c| c.component_id() == id) {
            return Err(TxnError::DuplicateComponent { component: id });
        }
        debug!(target: "tripledb::txn", component = %id, "component registered");
        setup.components.push(component);
        Ok(())
    }

    /// Unregisters a component, returning it if it was registered.
    ///
    /// # Errors
    ///
    /// [`TxnError::ConfigurationLocked`] after `start()`.
    pub fn remove(&self, id: ComponentId) -> TxnResult<Option<Arc<dyn TransactionalComponent>>> {
        let adm = self.inner.admission.lock();
        check_configuring(adm.phase)?;
        let mut setup = self.inner.setup.write();
        let position = setup.components.iter().position(|c| c.component_id() == id);
        Ok(position.map(|i| setup.components.remove(i)))
    }

    /// Ids of the registered components, in registration order.
    #[must_use]
    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.inner
            .setup
            .read()
            .components
            .iter()
            .map(|c| c.component_id())
            .collect()
    }

    /// Registers a lifecycle listener.
    ///
    /// # Errors
    ///
    /// [`TxnError::ConfigurationLocked`] after `start()`.
    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) -> TxnResult<()> {
        let adm = self.inner.admission.lock();
        check_configuring(adm.phase)?;
        self.inner.setup.write().listeners.push(listener);
        Ok(())
    }

    /// Installs the selector choosing which components take part in each
    /// new transaction. Without one, every component takes part.
    ///
    /// # Errors
    ///
    /// [`TxnError::ConfigurationLocked`] after `start()`.
    pub fn set_component_selector(&self, selector: Arc<dyn ComponentSelector>) -> TxnResult<()> {
        let adm = self.inner.admission.lock();
        check_configuring(adm.phase)?;
        self.inner.setup.write().selector = Some(selector);
        Ok(())
    }

    /// Registers a hook run once by `shutdown()` or `release()`, after the
    /// components were shut down.
    ///
    /// # Errors
    ///
    /// [`TxnError::Shutdown`] once shutdown has begun.
    pub fn add_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) -> TxnResult<()> {
        let adm = self.inner.admission.lock();
        if matches!(adm.phase, Phase::ShuttingDown | Phase::Shutdown) {
            return Err(TxnError::Shutdown);
        }
        self.inner.hooks.lock().push(Box::new(hook));
        Ok(())
    }

    // =========================================================================
    // Start and recovery
    // =========================================================================

    /// Recovers from the journal and opens the coordinator for transactions.
    ///
    /// Every journal entry is replayed into the matching components through
    /// their idempotent `commit`, then the journal is reset. With nothing to
    /// replay, every component gets `clean_start` instead.
    ///
    /// # Errors
    ///
    /// Fails on journal corruption or if a component rejects a replayed
    /// payload; the coordinator then stays unstarted.
    pub fn start(&self) -> TxnResult<()> {
        {
            let mut adm = self.inner.admission.lock();
            match adm.phase {
                Phase::Configuring => adm.phase = Phase::Starting,
                Phase::Starting | Phase::Running => {
                    return Err(TxnError::protocol("coordinator already started"));
                }
                Phase::ShuttingDown | Phase::Shutdown => return Err(TxnError::Shutdown),
            }
        }

        let recovered = self.inner.recover();

        let mut adm = self.inner.admission.lock();
        match recovered {
            Ok(last_id) => {
                if let Some(last_id) = last_id {
                    adm.next_txn_id = adm.next_txn_id.max(last_id.as_u64() + 1);
                }
                adm.phase = Phase::Running;
                drop(adm);
                self.inner.changed.notify_all();
                debug!(target: "tripledb::txn", "coordinator started");
                Ok(())
            }
            Err(err) => {
                adm.phase = Phase::Configuring;
                Err(err)
            }
        }
    }

    /// Whether `start()` has completed and shutdown has not begun.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.admission.lock().phase == Phase::Running
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Requests a new transaction.
    ///
    /// Returns `Ok(None)` when the transaction cannot be admitted right now
    /// and `can_block` is false. With `can_block` the call waits instead.
    ///
    /// # Errors
    ///
    /// - [`TxnError::NotStarted`] before `start()`
    /// - [`TxnError::Shutdown`] once shutdown begins, including while
    ///   waiting
    /// - a component failure from its `begin`; the transaction is then
    ///   rolled back
    pub fn begin(&self, mode: TxnMode, can_block: bool) -> TxnResult<Option<Transaction>> {
        let Some(id) = self.inner.admit(mode, can_block)? else {
            return Ok(None);
        };

        let data_version = match self.inner.begin_components(id, mode) {
            Ok(version) => version,
            Err(err) => {
                self.inner.rollback(id);
                return Err(err);
            }
        };

        let mut txn = Transaction::new(Arc::clone(&self.inner), id, mode, data_version);
        txn.begin()?;
        debug!(target: "tripledb::txn", txn_id = %id, %mode, %data_version, "transaction begun");
        self.inner.each_listener(|l| l.on_begin(id, mode));
        Ok(Some(txn))
    }

    /// Begins a READ transaction, waiting if exclusive mode holds.
    ///
    /// # Errors
    ///
    /// See [`begin`](Self::begin).
    pub fn begin_read(&self) -> TxnResult<Transaction> {
        self.begin_blocking(TxnMode::Read)
    }

    /// Begins a WRITE transaction, waiting for the writer slot.
    ///
    /// # Errors
    ///
    /// See [`begin`](Self::begin).
    pub fn begin_write(&self) -> TxnResult<Transaction> {
        self.begin_blocking(TxnMode::Write)
    }

    fn begin_blocking(&self, mode: TxnMode) -> TxnResult<Transaction> {
        self.begin(mode, true)?
            .ok_or_else(|| TxnError::protocol("blocking begin returned without a transaction"))
    }

    /// Runs `f` inside a READ transaction that is ended on every path.
    ///
    /// # Errors
    ///
    /// Fails if the transaction cannot begin.
    pub fn execute_read<T>(&self, f: impl FnOnce(&Transaction) -> T) -> TxnResult<T> {
        let mut txn = self.begin_read()?;
        let value = f(&txn);
        txn.commit()?;
        txn.end()?;
        Ok(value)
    }

    /// Runs `f` inside a WRITE transaction.
    ///
    /// Commits if `f` returns `Ok`, aborts if it returns `Err` or panics;
    /// the transaction is ended on every path.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or the begin or commit failure.
    pub fn execute_write<T>(&self, f: impl FnOnce(&Transaction) -> TxnResult<T>) -> TxnResult<T> {
        let mut txn = self.begin_write()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                txn.end()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort()?;
                txn.end()?;
                Err(err)
            }
        }
    }

    // =========================================================================
    // Writer blocking and exclusive mode
    // =========================================================================

    /// Stops new WRITE transactions from being admitted.
    ///
    /// Takes the single writer slot, so it waits for an active writer to
    /// finish. READ transactions are unaffected.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator is not running.
    pub fn block_writers(&self) -> TxnResult<()> {
        self.try_block_writers_with(true).map(|_| ())
    }

    /// Non-blocking [`block_writers`](Self::block_writers).
    ///
    /// Returns false if a writer is active, writers are already blocked, or
    /// another request is queued.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator is not running.
    pub fn try_block_writers(&self) -> TxnResult<bool> {
        self.try_block_writers_with(false)
    }

    /// [`block_writers`](Self::block_writers) that waits only if
    /// `can_block`.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator is not running.
    pub fn try_block_writers_with(&self, can_block: bool) -> TxnResult<bool> {
        let inner = &self.inner;
        let mut adm = inner.admission.lock();
        adm.check_running()?;
        if can_block {
            inner.queue_and_wait(&mut adm, WaitKind::BlockWriters, Admission::writer_slot_free)?;
        } else if !(adm.queue.is_empty() && adm.writer_slot_free()) {
            return Ok(false);
        }
        adm.writers_blocked = true;
        drop(adm);
        inner.changed.notify_all();
        debug!(target: "tripledb::txn", "writers blocked");
        Ok(true)
    }

    /// Re-admits WRITE transactions.
    ///
    /// # Errors
    ///
    /// Protocol error if writers are not blocked.
    pub fn enable_writers(&self) -> TxnResult<()> {
        let mut adm = self.inner.admission.lock();
        if !adm.writers_blocked {
            return Err(TxnError::protocol("enable_writers called while writers are not blocked"));
        }
        adm.writers_blocked = false;
        drop(adm);
        self.inner.changed.notify_all();
        debug!(target: "tripledb::txn", "writers enabled");
        Ok(())
    }

    /// Whether writers are blocked.
    #[must_use]
    pub fn writers_blocked(&self) -> bool {
        self.inner.admission.lock().writers_blocked
    }

    /// Runs `f` with writers blocked, re-enabling them on every path.
    ///
    /// # Errors
    ///
    /// Fails if writers cannot be blocked.
    pub fn exec_as_writer<T>(&self, f: impl FnOnce() -> T) -> TxnResult<T> {
        self.block_writers()?;
        let _guard = WritersBlockedGuard { coordinator: self };
        Ok(f())
    }

    /// Enters exclusive mode, waiting until no transaction is active.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator is not running.
    pub fn start_exclusive_mode(&self) -> TxnResult<()> {
        self.try_exclusive_mode(true).map(|_| ())
    }

    /// Enters exclusive mode.
    ///
    /// Without `can_block` this returns false if any transaction is active,
    /// exclusive mode is already held, or another request is queued.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator is not running.
    pub fn try_exclusive_mode(&self, can_block: bool) -> TxnResult<bool> {
        let inner = &self.inner;
        let mut adm = inner.admission.lock();
        adm.check_running()?;
        let ready = |adm: &Admission| !adm.exclusive && adm.active.is_empty();
        if can_block {
            inner.queue_and_wait(&mut adm, WaitKind::Exclusive, ready)?;
        } else if !(adm.queue.is_empty() && ready(&*adm)) {
            return Ok(false);
        }
        adm.exclusive = true;
        drop(adm);
        inner.changed.notify_all();
        info!(target: "tripledb::txn", "exclusive mode started");
        Ok(true)
    }

    /// Leaves exclusive mode, resuming normal admission.
    ///
    /// # Errors
    ///
    /// Protocol error if exclusive mode is not held.
    pub fn finish_exclusive_mode(&self) -> TxnResult<()> {
        let mut adm = self.inner.admission.lock();
        if !adm.exclusive {
            return Err(TxnError::protocol("finish_exclusive_mode called outside exclusive mode"));
        }
        adm.exclusive = false;
        drop(adm);
        self.inner.changed.notify_all();
        info!(target: "tripledb::txn", "exclusive mode finished");
        Ok(())
    }

    /// Whether exclusive mode is held.
    #[must_use]
    pub fn is_exclusive_mode(&self) -> bool {
        self.inner.admission.lock().exclusive
    }

    /// Runs `f` in exclusive mode, leaving it on every path.
    ///
    /// # Errors
    ///
    /// Fails if exclusive mode cannot be entered.
    pub fn exec_exclusive<T>(&self, f: impl FnOnce() -> T) -> TxnResult<T> {
        self.start_exclusive_mode()?;
        let _guard = ExclusiveGuard { coordinator: self };
        Ok(f())
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Number of transactions in the active registry.
    #[must_use]
    pub fn count_active(&self) -> usize {
        self.inner.admission.lock().active.len()
    }

    /// Number of active READ transactions.
    #[must_use]
    pub fn count_active_readers(&self) -> usize {
        self.inner
            .admission
            .lock()
            .active
            .values()
            .filter(|mode| **mode == TxnMode::Read)
            .count()
    }

    /// Number of active WRITE transactions (0 or 1).
    #[must_use]
    pub fn count_active_writer(&self) -> usize {
        usize::from(self.inner.admission.lock().active_writer.is_some())
    }

    /// Transactions begun since creation.
    #[must_use]
    pub fn count_begin(&self) -> u64 {
        self.inner.admission.lock().counters.begin
    }

    /// READ transactions begun since creation.
    #[must_use]
    pub fn count_begin_read(&self) -> u64 {
        self.inner.admission.lock().counters.begin_read
    }

    /// WRITE transactions begun since creation.
    #[must_use]
    pub fn count_begin_write(&self) -> u64 {
        self.inner.admission.lock().counters.begin_write
    }

    /// Requests waiting in the admission queue.
    #[must_use]
    pub fn count_queued(&self) -> usize {
        self.inner.admission.lock().queue.len()
    }

    /// READ transactions promoted to WRITE since creation.
    #[must_use]
    pub fn count_promoted(&self) -> u64 {
        self.inner.admission.lock().counters.promoted
    }

    /// Transactions that left the active registry.
    #[must_use]
    pub fn count_finished(&self) -> u64 {
        self.inner.admission.lock().counters.finished
    }

    /// Version of the committed data; advanced by every write commit.
    #[must_use]
    pub fn data_version(&self) -> DataVersion {
        DataVersion::new(self.inner.data_version.load(Ordering::SeqCst))
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.inner.journal
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Rejects new transactions, waits for active ones, then shuts down the
    /// components, runs shutdown hooks and releases the journal.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Fails if the final journal sync fails.
    pub fn shutdown(&self) -> TxnResult<()> {
        self.inner.close(true)
    }

    /// Like [`shutdown`](Self::shutdown) but leaves the components running.
    ///
    /// # Errors
    ///
    /// Fails if the final journal sync fails.
    pub fn release(&self) -> TxnResult<()> {
        self.inner.close(false)
    }

    /// Whether shutdown or release has completed.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.admission.lock().phase == Phase::Shutdown
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adm = self.inner.admission.lock();
        f.debug_struct("TransactionCoordinator")
            .field("phase", &adm.phase)
            .field("active", &adm.active.len())
            .field("writers_blocked", &adm.writers_blocked)
            .field("exclusive", &adm.exclusive)
            .finish_non_exhaustive()
    }
}

fn check_configuring(phase: Phase) -> TxnResult<()> {
    match phase {
        Phase::Configuring => Ok(()),
        Phase::Starting | Phase::Running => Err(TxnError::ConfigurationLocked),
        Phase::ShuttingDown | Phase::Shutdown => Err(TxnError::Shutdown),
    }
}

struct ExclusiveGuard<'a> {
    coordinator: &'a TransactionCoordinator,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.coordinator.finish_exclusive_mode() {
            warn!(target: "tripledb::txn", error = %err, "failed to leave exclusive mode");
        }
    }
}

struct WritersBlockedGuard<'a> {
    coordinator: &'a TransactionCoordinator,
}

impl Drop for WritersBlockedGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.coordinator.enable_writers() {
            warn!(target: "tripledb::txn", error = %err, "failed to re-enable writers");
        }
    }
}

impl CoordinatorInner {
    fn components(&self) -> Vec<Arc<dyn TransactionalComponent>> {
        self.setup.read().components.clone()
    }

    /// The components a new transaction in `mode` takes part in.
    fn choose_components(&self, mode: TxnMode) -> Vec<Arc<dyn TransactionalComponent>> {
        let setup = self.setup.read();
        let Some(wanted) = setup.selector.as_ref().and_then(|s| s.select(mode)) else {
            return setup.components.clone();
        };
        for id in &wanted {
            if !setup.components.iter().any(|c| c.component_id() == *id) {
                warn!(target: "tripledb::txn", component = %id, "selected component is not registered");
            }
        }
        let chosen: Vec<_> = setup
            .components
            .iter()
            .filter(|c| wanted.contains(&c.component_id()))
            .cloned()
            .collect();
        debug!(
            target: "tripledb::txn",
            %mode,
            chosen = chosen.len(),
            registered = setup.components.len(),
            "custom component set for transaction"
        );
        chosen
    }

    /// The components live transaction `id` takes part in.
    fn participants(&self, id: TxnId) -> Vec<Arc<dyn TransactionalComponent>> {
        self.participants.lock().get(&id).cloned().unwrap_or_default()
    }

    fn each_listener(&self, f: impl Fn(&dyn TransactionListener)) {
        let listeners = self.setup.read().listeners.clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    /// Queues a request and waits until it is at the front and `ready`
    /// holds. The caller applies its change and notifies.
    fn queue_and_wait(
        &self,
        adm: &mut MutexGuard<'_, Admission>,
        kind: WaitKind,
        ready: impl Fn(&Admission) -> bool,
    ) -> TxnResult<()> {
        let ticket = adm.enqueue(kind);
        loop {
            if let Err(err) = adm.check_running() {
                adm.dequeue(ticket);
                self.changed.notify_all();
                return Err(err);
            }
            if adm.is_front(ticket) && ready(&**adm) {
                adm.dequeue(ticket);
                return Ok(());
            }
            self.changed.wait(adm);
        }
    }

    fn admit(&self, mode: TxnMode, can_block: bool) -> TxnResult<Option<TxnId>> {
        let mut adm = self.admission.lock();
        adm.check_running()?;
        match (mode, can_block) {
            (TxnMode::Read, false) => {
                if !adm.readers_admissible() {
                    return Ok(None);
                }
            }
            (TxnMode::Read, true) => loop {
                adm.check_running()?;
                if adm.readers_admissible() {
                    break;
                }
                self.changed.wait(&mut adm);
            },
            (TxnMode::Write, false) => {
                let admissible =
                    adm.readers_admissible() && adm.writer_slot_free() && adm.queue.is_empty();
                if !admissible {
                    return Ok(None);
                }
            }
            (TxnMode::Write, true) => {
                self.queue_and_wait(&mut adm, WaitKind::Writer, |adm| {
                    !adm.exclusive && adm.writer_slot_free()
                })?;
            }
        }
        let id = adm.register(mode);
        drop(adm);
        self.changed.notify_all();
        Ok(Some(id))
    }

    fn begin_components(&self, id: TxnId, mode: TxnMode) -> TxnResult<DataVersion> {
        let components = self.choose_components(mode);
        self.participants.lock().insert(id, components.clone());
        let _switch = self.switch.lock();
        let version = DataVersion::new(self.data_version.load(Ordering::SeqCst));
        for component in &components {
            component.begin(id, mode)?;
        }
        Ok(version)
    }

    fn current_version(&self) -> DataVersion {
        DataVersion::new(self.data_version.load(Ordering::SeqCst))
    }

    /// Promotes READ `id`, begun at data version `start`, to WRITE.
    ///
    /// Waits for the writer slot in the FIFO queue. Without read-committed
    /// promotion the data version is checked again once the slot is held:
    /// any write committed since `start` refuses the promotion.
    pub(crate) fn promote_txn(&self, id: TxnId, start: DataVersion) -> TxnResult<Promotion> {
        let read_committed = self.config.read_committed_promotion;
        // Versions only grow; a mismatch now cannot heal while waiting.
        if !read_committed && start < self.current_version() {
            return Ok(Promotion::Refused);
        }
        if !self.acquire_writer_slot(id)? {
            return Ok(Promotion::Refused);
        }

        let components = self.participants(id);
        let outcome = {
            let _switch = self.switch.lock();
            let current = self.current_version();
            if !read_committed && current != start {
                Promotion::Refused
            } else {
                match components
                    .iter()
                    .try_for_each(|c| c.promote(id, read_committed))
                {
                    Ok(()) => Promotion::Granted(current),
                    Err(err) => Promotion::Failed(err),
                }
            }
        };

        match &outcome {
            Promotion::Granted(version) => {
                self.admission.lock().counters.promoted += 1;
                debug!(target: "tripledb::txn", txn_id = %id, data_version = %version, "transaction promoted");
            }
            Promotion::Refused => {
                self.release_writer_slot(id);
                debug!(target: "tripledb::txn", txn_id = %id, "promotion refused, data changed");
            }
            Promotion::Failed(err) => {
                self.release_writer_slot(id);
                warn!(target: "tripledb::txn", txn_id = %id, error = %err, "component refused promotion");
            }
        }
        Ok(outcome)
    }

    /// Queues READ `id` for the writer slot; false if an exclusive-mode
    /// request ahead of it would wait on it forever.
    fn acquire_writer_slot(&self, id: TxnId) -> TxnResult<bool> {
        let mut adm = self.admission.lock();
        adm.check_running()?;
        let ticket = adm.enqueue(WaitKind::Writer);
        loop {
            if let Err(err) = adm.check_running() {
                adm.dequeue(ticket);
                drop(adm);
                self.changed.notify_all();
                return Err(err);
            }
            if adm.exclusive_queued_ahead(ticket) {
                adm.dequeue(ticket);
                drop(adm);
                self.changed.notify_all();
                return Ok(false);
            }
            if adm.is_front(ticket) && adm.writer_slot_free() {
                adm.dequeue(ticket);
                break;
            }
            self.changed.wait(&mut adm);
        }
        adm.active_writer = Some(id);
        adm.active.insert(id, TxnMode::Write);
        drop(adm);
        self.changed.notify_all();
        Ok(true)
    }

    fn release_writer_slot(&self, id: TxnId) {
        let mut adm = self.admission.lock();
        if adm.active_writer == Some(id) {
            adm.active_writer = None;
        }
        if let Some(mode) = adm.active.get_mut(&id) {
            *mode = TxnMode::Read;
        }
        drop(adm);
        self.changed.notify_all();
    }

    /// Removes `id` from the registry and wakes waiters. Idempotent.
    fn unregister(&self, id: TxnId) {
        let removed = self.admission.lock().unregister(id);
        if removed {
            self.changed.notify_all();
        }
    }

    fn complete(&self, id: TxnId, components: &[Arc<dyn TransactionalComponent>]) {
        for component in components {
            component.complete(id);
        }
        self.participants.lock().remove(&id);
        self.unregister(id);
    }

    fn abort_components(&self, id: TxnId, components: &[Arc<dyn TransactionalComponent>]) {
        for component in components {
            if let Err(err) = component.abort(id) {
                warn!(
                    target: "tripledb::txn",
                    txn_id = %id,
                    component = %component.component_id(),
                    error = %err,
                    "component abort failed"
                );
            }
        }
    }

    /// Undoes an admission whose component `begin` failed.
    fn rollback(&self, id: TxnId) {
        let components = self.participants(id);
        self.abort_components(id, &components);
        self.complete(id, &components);
    }

    pub(crate) fn commit_txn(&self, id: TxnId, mode: TxnMode) -> TxnResult<()> {
        let components = self.participants(id);
        if mode == TxnMode::Write {
            if let Err(err) = self.commit_write(id, &components) {
                self.abort_components(id, &components);
                self.complete(id, &components);
                debug!(target: "tripledb::txn", txn_id = %id, error = %err, "commit failed, transaction aborted");
                self.each_listener(|l| l.on_abort(id, mode));
                return Err(err);
            }
        }
        self.complete(id, &components);
        debug!(target: "tripledb::txn", txn_id = %id, %mode, "transaction committed");
        self.each_listener(|l| l.on_commit(id, mode));
        Ok(())
    }

    /// Prepare, journal, finalize. On `Err` nothing was finalized.
    fn commit_write(&self, id: TxnId, components: &[Arc<dyn TransactionalComponent>]) -> TxnResult<()> {
        let mut entry = JournalEntry::new(id);
        for component in components {
            match component.prepare_commit(id) {
                Ok(Some(payload)) => entry.push(component.component_id(), payload),
                Ok(None) => {}
                Err(err) => {
                    return Err(TxnError::PrepareFailed {
                        component: component.component_id(),
                        source: Box::new(err),
                    });
                }
            }
        }
        self.each_listener(|l| l.on_prepare(id, TxnMode::Write));

        // An entry with no payloads has nothing to replay.
        let journaled = !entry.payloads.is_empty();
        if journaled {
            self.write_entry(&entry)?;
        }

        let mut failed = false;
        {
            let _switch = self.switch.lock();
            for component in components {
                let payload = entry.payload_for(component.component_id());
                if let Err(err) = component.commit(id, payload) {
                    failed = true;
                    error!(
                        target: "tripledb::txn",
                        txn_id = %id,
                        component = %component.component_id(),
                        error = %err,
                        "component failed to finalize; journal entry kept for replay"
                    );
                }
            }
            self.data_version.fetch_add(1, Ordering::SeqCst);
        }

        if failed {
            self.journal_outstanding.store(true, Ordering::SeqCst);
        } else if journaled && !self.journal_outstanding.load(Ordering::SeqCst) {
            if let Err(err) = self.journal.reset() {
                warn!(target: "tripledb::journal", txn_id = %id, error = %err, "journal reset failed");
            }
        }
        Ok(())
    }

    fn write_entry(&self, entry: &JournalEntry) -> TxnResult<()> {
        let offset = self.journal.append(entry)?;
        let durable = if self.config.sync_on_commit {
            self.journal.sync()
        } else {
            self.journal.flush()
        };
        if let Err(err) = durable {
            if let Err(cut) = self.journal.truncate(offset) {
                error!(
                    target: "tripledb::journal",
                    txn_id = %entry.txn_id,
                    error = %cut,
                    "could not remove unsynced journal entry"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn abort_txn(&self, id: TxnId, mode: TxnMode) {
        let components = self.participants(id);
        self.abort_components(id, &components);
        self.complete(id, &components);
        debug!(target: "tripledb::txn", txn_id = %id, %mode, "transaction aborted");
        self.each_listener(|l| l.on_abort(id, mode));
    }

    pub(crate) fn finish_read(&self, id: TxnId) {
        let components = self.participants(id);
        self.complete(id, &components);
    }

    pub(crate) fn ended(&self, id: TxnId, mode: TxnMode) {
        self.each_listener(|l| l.on_end(id, mode));
    }

    /// Replays the journal; returns the largest replayed transaction id.
    fn recover(&self) -> TxnResult<Option<TxnId>> {
        let components = self.components();
        let size = self.journal.size()?;
        let entries = self.journal.entries()?;

        if entries.is_empty() {
            for component in &components {
                component.clean_start();
            }
            if size > 0 {
                self.journal.reset()?;
            }
            return Ok(None);
        }

        info!(
            target: "tripledb::journal",
            entries = entries.len(),
            "replaying journal"
        );
        for component in &components {
            component.start_recovery();
        }

        let by_id: HashMap<ComponentId, &Arc<dyn TransactionalComponent>> = components
            .iter()
            .map(|c| (c.component_id(), c))
            .collect();
        let mut last = None;
        for entry in &entries {
            for (component_id, payload) in &entry.payloads {
                match by_id.get(component_id) {
                    Some(component) => component.commit(entry.txn_id, Some(payload.as_slice()))?,
                    None => warn!(
                        target: "tripledb::journal",
                        txn_id = %entry.txn_id,
                        component = %component_id,
                        "journal entry for unregistered component skipped"
                    ),
                }
            }
            last = last.max(Some(entry.txn_id));
        }

        for component in &components {
            component.finish_recovery();
        }
        self.journal.reset()?;
        self.journal_outstanding.store(false, Ordering::SeqCst);
        self.data_version
            .fetch_add(entries.len() as u64, Ordering::SeqCst);

        info!(
            target: "tripledb::journal",
            entries = entries.len(),
            "journal recovery complete"
        );
        Ok(last)
    }

    fn close(&self, shutdown_components: bool) -> TxnResult<()> {
        let mut adm = self.admission.lock();
        if matches!(adm.phase, Phase::ShuttingDown | Phase::Shutdown) {
            return Ok(());
        }
        adm.phase = Phase::ShuttingDown;
        self.changed.notify_all();

        if !adm.active.is_empty() {
            if self.config.warn_on_active_shutdown {
                warn!(
                    target: "tripledb::txn",
                    active = adm.active.len(),
                    "shutdown waiting for active transactions"
                );
            }
            while !adm.active.is_empty() {
                self.changed.wait(&mut adm);
            }
        }
        drop(adm);

        if shutdown_components {
            for component in self.components() {
                component.shutdown();
            }
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }

        let synced = self.journal.sync();
        drop(self.location.lock().take());
        self.admission.lock().phase = Phase::Shutdown;
        self.changed.notify_all();
        info!(
            target: "tripledb::txn",
            components_shut_down = shutdown_components,
            "coordinator shut down"
        );
        synced
    }
}
