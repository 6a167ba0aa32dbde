//! Error types for the transaction core.

use crate::component::ComponentId;
use std::io;
use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors raised by the coordinator, transactions, components and journal.
///
/// Admission denial is not in here: `begin(mode, false)` reports it as
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tripledb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Programmer misuse of the transaction protocol.
    #[error("transaction protocol error: {message}")]
    Protocol {
        /// What was misused.
        message: String,
    },

    /// The coordinator has not been started.
    #[error("transaction coordinator has not been started")]
    NotStarted,

    /// Configuration changes are only allowed before `start()`.
    #[error("transaction coordinator configuration is locked")]
    ConfigurationLocked,

    /// The coordinator is shut down or shutting down.
    #[error("transaction coordinator has been shut down")]
    Shutdown,

    /// Two components registered with the same id.
    #[error("component {component} is already registered")]
    DuplicateComponent {
        /// The clashing id.
        component: ComponentId,
    },

    /// A component reported a failure.
    #[error("component {component} failed: {message}")]
    Component {
        /// The failing component.
        component: ComponentId,
        /// Description of the failure.
        message: String,
    },

    /// A component could not prepare; the transaction was aborted.
    #[error("prepare failed in component {component}; transaction aborted")]
    PrepareFailed {
        /// The component whose prepare failed.
        component: ComponentId,
        /// The underlying failure.
        #[source]
        source: Box<TxnError>,
    },

    /// The journal is corrupted.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Journal record checksum mismatch.
    #[error("journal checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another coordinator holds the journal directory.
    #[error("journal directory locked: {path}")]
    LocationLocked {
        /// The locked directory.
        path: String,
    },

    /// The journal directory is missing or not a directory.
    #[error("invalid journal location: {message}")]
    InvalidLocation {
        /// Description of the problem.
        message: String,
    },

    /// A unit of work on another thread panicked.
    #[error("task {name} panicked")]
    TaskPanicked {
        /// Thread name.
        name: String,
    },

    /// A unit of work was dropped before it was run.
    #[error("task {name} was cancelled before it ran")]
    TaskCancelled {
        /// Thread name.
        name: String,
    },
}

impl TxnError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a component failure.
    pub fn component(component: ComponentId, message: impl Into<String>) -> Self {
        Self::Component {
            component,
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid location error.
    pub fn invalid_location(message: impl Into<String>) -> Self {
        Self::InvalidLocation {
            message: message.into(),
        }
    }

    /// Whether this is programmer misuse rather than a runtime failure.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
