//! Error types for step execution and registry construction.
//!
//! Decode failures live in [`parley_proto::DecodeError`]; an unmatched
//! `(state, message)` pair is not an error at all (see
//! [`crate::registry::DropReason`]).

use parley_proto::{EncodeError, Identity, MessageKind, ProtocolId, StateKind};
use thiserror::Error;

/// Failure reported by the channel delegate.
///
/// The engine never retries. A step decides whether this is fatal (move to a
/// terminal state) or whether to leave its state unchanged and wait for the
/// next trigger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No confirmed secure channel exists to the target.
    #[error("no secure channel from {owned} to {target}")]
    NoSecureChannel {
        /// Sending identity
        owned: Identity,
        /// Unreachable contact
        target: Identity,
    },

    /// The owned identity has no other device to propagate to.
    #[error("owned identity {0} has no other device")]
    NoOtherDevice(Identity),

    /// The channel refused the message for another reason.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the identity delegate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The owned identity is not managed by this device.
    #[error("unknown owned identity {0}")]
    UnknownOwnedIdentity(Identity),

    /// Backing database failed.
    #[error("identity database error: {0}")]
    Database(String),
}

/// Failure of the waiting-instance ledger backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Store could not be read or written.
    #[error("waiting ledger unavailable: {0}")]
    Unavailable(String),
}

/// Error raised while executing a step.
///
/// Any error rolls back the whole step: no state change, no deliveries, no
/// identity changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Channel delegate refused a post the step could not tolerate.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Identity delegate failed.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Waiting ledger failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// An outbound value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Programming error in a protocol definition or engine wiring.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Error raised while building a [`crate::ProtocolRegistry`].
///
/// Every variant is a programming error and is reported at startup, before
/// any message is processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two steps of one protocol declare the same `(state, message)` pair.
    #[error("protocol {protocol}: steps {first} and {second} both handle ({state}, {message})")]
    DuplicateStep {
        /// Offending protocol
        protocol: ProtocolId,
        /// Shared start state
        state: StateKind,
        /// Shared message
        message: MessageKind,
        /// Step registered first
        first: &'static str,
        /// Step registered second
        second: &'static str,
    },

    /// Two protocols share one id.
    #[error("protocol {0} registered twice")]
    DuplicateProtocol(ProtocolId),

    /// A protocol declares no steps.
    #[error("protocol {0} declares no steps")]
    NoSteps(ProtocolId),
}
