//! Core type definitions.

use std::fmt;

/// Identifier of a transaction.
///
/// Allocated in begin order under the coordinator's admission lock; unique
/// and increasing within one coordinator, never across coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Version of the committed data.
///
/// Advanced once per successful write commit; aborts leave it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataVersion(pub u64);

impl DataVersion {
    /// Creates a data version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnMode {
    /// Read-only; any number may run at once.
    Read,
    /// Read-write; at most one per coordinator.
    Write,
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
        }
    }
}

/// Lifecycle state of a transaction.
///
/// Moves only forward: `Inactive → Active → (Committed | Aborted) → Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Created but not yet begun.
    Inactive,
    /// Running.
    Active,
    /// Committed, waiting for `end()`.
    Committed,
    /// Aborted, waiting for `end()`.
    Aborted,
    /// Finished; the handle is spent.
    Ended,
}
