//! Engine error types.
//!
//! Provides strongly-typed errors for message execution:
//! - Decoding (unknown protocol, message or state)
//! - Step failures (rolled back, nothing committed)
//! - Storage failures (commit rejected or backend down)

use std::fmt;

use parley_core::{RunError, StepError};
use parley_proto::DecodeError;

use crate::storage::StorageError;

/// Errors that can occur while executing a message.
///
/// Every variant means the transaction was rolled back: no state change, no
/// deliveries, no identity changes.
#[derive(Debug)]
pub enum EngineError {
    /// Message or stored state could not be decoded.
    ///
    /// Unknown protocol, unknown message or state tag, or a payload of the
    /// wrong shape. Indicates version skew or corruption; the message should
    /// be logged and discarded.
    Decode(DecodeError),

    /// The step failed.
    ///
    /// A collaborator refused something the step could not tolerate. The
    /// engine never retries; a later trigger may succeed.
    Step(StepError),

    /// Storage operation failed.
    ///
    /// See `StorageError` for details. Transient for revision conflicts and
    /// I/O errors.
    Storage(StorageError),

    /// Programming error in a protocol definition or engine wiring.
    ///
    /// Fatal - report as issue. Detected before anything was committed.
    InvariantViolation(String),
}

impl EngineError {
    /// Whether retrying the same message may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "decode error: {err}"),
            Self::Step(err) => write!(f, "step error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            Self::Step(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::InvariantViolation(_) => None,
        }
    }
}

impl From<DecodeError> for EngineError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<StepError> for EngineError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::InvariantViolation(msg) => Self::InvariantViolation(msg),
            other => Self::Step(other),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<RunError> for EngineError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Decode(err) => err.into(),
            RunError::Step(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::ChannelError;
    use parley_proto::ProtocolId;

    use super::*;

    #[test]
    fn engine_error_display() {
        let err = EngineError::Decode(DecodeError::UnknownProtocol(ProtocolId(7)));
        assert!(err.to_string().starts_with("decode error: "));

        let err = EngineError::InvariantViolation("two steps".to_string());
        assert_eq!(err.to_string(), "invariant violation: two steps");
    }

    #[test]
    fn step_invariant_violations_are_lifted() {
        let err: EngineError = StepError::InvariantViolation("unset".to_string()).into();
        assert!(matches!(err, EngineError::InvariantViolation(msg) if msg == "unset"));

        let err: EngineError =
            RunError::Step(StepError::Channel(ChannelError::Unavailable("down".to_string())))
                .into();
        assert!(matches!(err, EngineError::Step(StepError::Channel(_))));
    }

    #[test]
    fn only_storage_faults_are_transient() {
        let conflict = StorageError::Conflict { expected: 1, got: 2 };
        assert!(EngineError::Storage(conflict).is_transient());
        assert!(!EngineError::Storage(StorageError::Serialization("x".to_string())).is_transient());
        assert!(!EngineError::InvariantViolation("x".to_string()).is_transient());
    }

    #[test]
    fn terminated_writes_are_not_retried() {
        let key = crate::storage::contract::key(1);
        let err = EngineError::from(StorageError::Terminated(key));
        assert!(!err.is_transient());
        assert!(err.to_string().ends_with("already terminated"));
    }
}
