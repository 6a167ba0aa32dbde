//! Coordinator configuration.

/// Configuration for a [`crate::TransactionCoordinator`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Sync the journal (rather than just flush it) after each commit entry.
    pub sync_on_commit: bool,

    /// Create the journal directory if it does not exist.
    pub create_if_missing: bool,

    /// Prefix for threads spawned by `ThreadTxn` and `ParallelLoader`.
    pub thread_name_prefix: String,

    /// Log a warning when shutdown finds transactions still active.
    pub warn_on_active_shutdown: bool,

    /// Let a READ transaction promote to WRITE even after other writes
    /// committed since it began; it then moves to the latest committed
    /// state. Off by default, so a promoted transaction never sees data it
    /// did not start from.
    pub read_committed_promotion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            create_if_missing: true,
            thread_name_prefix: "tripledb-txn".to_string(),
            warn_on_active_shutdown: true,
            read_committed_promotion: false,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create a missing journal directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets whether shutdown warns about active transactions.
    #[must_use]
    pub const fn warn_on_active_shutdown(mut self, value: bool) -> Self {
        self.warn_on_active_shutdown = value;
        self
    }

    /// Sets whether promotion may skip over intervening commits.
    #[must_use]
    pub const fn read_committed_promotion(mut self, value: bool) -> Self {
        self.read_committed_promotion = value;
        self
    }
}
