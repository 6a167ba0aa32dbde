//! Parallel bulk loading under exclusive mode.
//!
//! The primary coordinator enters exclusive mode, so no ordinary reader can
//! observe a half-loaded dataset. Each worker then drives its own slice of
//! components through a private in-memory coordinator: one WRITE
//! transaction per worker, committed with the usual prepare and finalize
//! calls. Workers release their coordinators without shutting the
//! components down, since the primary dataset still owns them.

use crate::component::TransactionalComponent;
use crate::error::{TxnError, TxnResult};
use crate::thread::ThreadTxn;
use crate::transaction::{Transaction, TransactionCoordinator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

type Work = Box<dyn FnOnce(&Transaction) -> TxnResult<u64> + Send>;

/// One worker of a [`ParallelLoader`]: a disjoint slice of components and
/// the work to run over them.
pub struct LoaderWorker {
    name: String,
    components: Vec<Arc<dyn TransactionalComponent>>,
    work: Work,
}

impl LoaderWorker {
    /// Creates a worker.
    ///
    /// `work` runs inside the worker's single WRITE transaction and returns
    /// the number of items it loaded.
    pub fn new<F>(
        name: impl Into<String>,
        components: Vec<Arc<dyn TransactionalComponent>>,
        work: F,
    ) -> Self
    where
        F: FnOnce(&Transaction) -> TxnResult<u64> + Send + 'static,
    {
        Self {
            name: name.into(),
            components,
            work: Box::new(work),
        }
    }

    fn run(self) -> TxnResult<u64> {
        let coordinator = TransactionCoordinator::in_memory();
        for component in self.components {
            coordinator.add(component)?;
        }
        coordinator.start()?;

        let loaded = coordinator.execute_write(self.work);
        let released = coordinator.release();
        let items = loaded?;
        released?;

        debug!(target: "tripledb::loader", worker = %self.name, items, "worker finished");
        Ok(items)
    }
}

impl std::fmt::Debug for LoaderWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderWorker")
            .field("name", &self.name)
            .field("components", &self.components.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ParallelLoader::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    /// Workers that ran.
    pub workers: usize,
    /// Items reported by all workers.
    pub items: u64,
    /// Wall time spent in exclusive mode.
    pub elapsed: Duration,
}

/// Runs several [`LoaderWorker`]s concurrently while the primary
/// coordinator holds exclusive mode.
///
/// ```rust,ignore
/// let summary = ParallelLoader::new(&dataset)
///     .worker(LoaderWorker::new("nodes", vec![nodes], load_nodes))
///     .worker(LoaderWorker::new("spo", vec![spo, pos], load_triples))
///     .load()?;
/// ```
#[derive(Debug)]
pub struct ParallelLoader<'a> {
    primary: &'a TransactionCoordinator,
    workers: Vec<LoaderWorker>,
}

impl<'a> ParallelLoader<'a> {
    /// Creates a loader for the dataset driven by `primary`.
    #[must_use]
    pub fn new(primary: &'a TransactionCoordinator) -> Self {
        Self {
            primary,
            workers: Vec::new(),
        }
    }

    /// Adds a worker.
    #[must_use]
    pub fn worker(mut self, worker: LoaderWorker) -> Self {
        self.workers.push(worker);
        self
    }

    /// Runs every worker to completion.
    ///
    /// Waits for the primary's active transactions to drain, enters
    /// exclusive mode, starts all workers, joins them all, then leaves
    /// exclusive mode. Workers are independent: one failing does not stop
    /// the others.
    ///
    /// # Errors
    ///
    /// Returns the first worker failure (in worker order), or a failure to
    /// enter exclusive mode.
    pub fn load(self) -> TxnResult<LoadSummary> {
        let Self { primary, workers } = self;
        let count = workers.len();
        let prefix = primary.config().thread_name_prefix.clone();

        info!(target: "tripledb::loader", workers = count, "parallel load starting");
        let started = Instant::now();

        let results = primary.exec_exclusive(move || {
            let mut tasks = Vec::with_capacity(count);
            for worker in workers {
                let name = format!("{prefix}-load-{}", worker.name);
                tasks.push(ThreadTxn::execute(name, move || worker.run()));
            }
            let mut tasks = tasks.into_iter().collect::<TxnResult<Vec<_>>>()?;
            for task in &mut tasks {
                task.start();
            }
            Ok::<_, TxnError>(tasks.into_iter().map(ThreadTxn::run).collect::<Vec<_>>())
        })??;

        let elapsed = started.elapsed();
        let mut items = 0;
        for result in results {
            items += result?;
        }

        info!(
            target: "tripledb::loader",
            workers = count,
            items,
            elapsed_ms = elapsed.as_millis() as u64,
            "parallel load finished"
        );
        Ok(LoadSummary {
            workers: count,
            items,
            elapsed,
        })
    }
}
