//! Storage error types.
//!
//! - `Conflict`: a change set was computed against a stale instance revision
//! - `Terminated`: a change set tried to bring back a finished instance
//! - `Serialization`: a stored record could not be encoded or decoded
//! - `Io`: the underlying store failed

use parley_core::{InstanceKey, LedgerError};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Instance revision mismatch
    ///
    /// Another transaction committed a change to the same instance after this
    /// one loaded it. The whole change set is rejected; re-running the
    /// message against the fresh state is safe.
    #[error("revision conflict: expected {expected}, got {got}")]
    Conflict {
        /// Revision the change set was computed against
        expected: u64,
        /// Revision currently stored (0 when absent)
        got: u64,
    },

    /// Write to an instance that already reached a terminal state
    ///
    /// Retrying cannot succeed: the instance id is spent.
    #[error("instance {0} already terminated")]
    Terminated(InstanceKey),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Io(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        LedgerError::Unavailable(err.to_string())
    }
}
