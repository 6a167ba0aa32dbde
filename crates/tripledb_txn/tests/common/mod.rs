//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tripledb_txn::{
    ComponentId, TransCounter, TransactionCoordinator, TransactionListener,
    TransactionalComponent, TxnError, TxnId, TxnMode, TxnResult,
};
use tracing_subscriber::EnvFilter;

/// Routes coordinator logs to the test output; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A started in-memory coordinator with one counter at `initial`.
pub fn counter_setup(initial: i64) -> (TransactionCoordinator, Arc<TransCounter>) {
    init_tracing();
    let coordinator = TransactionCoordinator::in_memory();
    let counter = Arc::new(TransCounter::new(ComponentId::named("counter"), initial));
    coordinator.add(counter.clone()).unwrap();
    coordinator.start().unwrap();
    (coordinator, counter)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Wraps a component and fails selected protocol steps on demand.
pub struct Faulty<C> {
    inner: Arc<C>,
    fail_begin: AtomicBool,
    fail_prepare: AtomicBool,
    fail_finalize: AtomicBool,
    fail_promote: AtomicBool,
}

impl<C: TransactionalComponent> Faulty<C> {
    pub fn new(inner: Arc<C>) -> Self {
        Self {
            inner,
            fail_begin: AtomicBool::new(false),
            fail_prepare: AtomicBool::new(false),
            fail_finalize: AtomicBool::new(false),
            fail_promote: AtomicBool::new(false),
        }
    }

    pub fn fail_begin(&self, on: bool) {
        self.fail_begin.store(on, Ordering::SeqCst);
    }

    pub fn fail_prepare(&self, on: bool) {
        self.fail_prepare.store(on, Ordering::SeqCst);
    }

    pub fn fail_finalize(&self, on: bool) {
        self.fail_finalize.store(on, Ordering::SeqCst);
    }

    pub fn fail_promote(&self, on: bool) {
        self.fail_promote.store(on, Ordering::SeqCst);
    }

    fn injected(&self, step: &str) -> TxnError {
        TxnError::component(self.inner.component_id(), format!("injected {step} failure"))
    }
}

impl<C: TransactionalComponent> TransactionalComponent for Faulty<C> {
    fn component_id(&self) -> ComponentId {
        self.inner.component_id()
    }

    fn clean_start(&self) {
        self.inner.clean_start();
    }

    fn start_recovery(&self) {
        self.inner.start_recovery();
    }

    fn finish_recovery(&self) {
        self.inner.finish_recovery();
    }

    fn begin(&self, txn_id: TxnId, mode: TxnMode) -> TxnResult<()> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(self.injected("begin"));
        }
        self.inner.begin(txn_id, mode)
    }

    fn promote(&self, txn_id: TxnId, read_committed: bool) -> TxnResult<()> {
        if self.fail_promote.load(Ordering::SeqCst) {
            return Err(self.injected("promote"));
        }
        self.inner.promote(txn_id, read_committed)
    }

    fn prepare_commit(&self, txn_id: TxnId) -> TxnResult<Option<Vec<u8>>> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(self.injected("prepare"));
        }
        self.inner.prepare_commit(txn_id)
    }

    fn commit(&self, txn_id: TxnId, payload: Option<&[u8]>) -> TxnResult<()> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(self.injected("finalize"));
        }
        self.inner.commit(txn_id, payload)
    }

    fn abort(&self, txn_id: TxnId) -> TxnResult<()> {
        self.inner.abort(txn_id)
    }

    fn complete(&self, txn_id: TxnId) {
        self.inner.complete(txn_id);
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// Records every lifecycle callback as `"<event> <id> <mode>"`.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: &str, txn_id: TxnId, mode: TxnMode) {
        self.events.lock().push(format!("{event} {} {mode}", txn_id.as_u64()));
    }
}

impl TransactionListener for Recorder {
    fn on_begin(&self, txn_id: TxnId, mode: TxnMode) {
        self.record("begin", txn_id, mode);
    }

    fn on_prepare(&self, txn_id: TxnId, mode: TxnMode) {
        self.record("prepare", txn_id, mode);
    }

    fn on_commit(&self, txn_id: TxnId, mode: TxnMode) {
        self.record("commit", txn_id, mode);
    }

    fn on_abort(&self, txn_id: TxnId, mode: TxnMode) {
        self.record("abort", txn_id, mode);
    }

    fn on_end(&self, txn_id: TxnId, mode: TxnMode) {
        self.record("end", txn_id, mode);
    }
}
