//! Encoding and decoding errors.

use thiserror::Error;

use crate::ids::{MessageKind, ProtocolId, StateKind};

/// Failure to turn bytes back into a typed value.
///
/// Always fatal for the message being decoded: the engine logs it and
/// discards the message. Unknown tags mean version skew or corruption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// CBOR payload was malformed or did not match the expected shape.
    #[error("cbor decode failed: {0}")]
    Cbor(String),

    /// Envelope carried the wrong number of encoded inputs.
    #[error("expected {expected} encoded inputs, got {got}")]
    InputCount {
        /// Inputs the message kind declares
        expected: usize,
        /// Inputs actually present
        got: usize,
    },

    /// Protocol has no message with this tag.
    #[error("unknown message kind {kind} for protocol {protocol}")]
    UnknownMessageKind {
        /// Protocol the envelope was addressed to
        protocol: ProtocolId,
        /// Unrecognized tag
        kind: MessageKind,
    },

    /// Protocol has no state with this tag.
    #[error("unknown state kind {kind} for protocol {protocol}")]
    UnknownStateKind {
        /// Protocol owning the stored state
        protocol: ProtocolId,
        /// Unrecognized tag
        kind: StateKind,
    },

    /// No hosted protocol answers to this id.
    #[error("unknown protocol {0}")]
    UnknownProtocol(ProtocolId),

    /// Message kind is only valid as an answer to a dialog.
    #[error("message kind {0} requires a dialog response")]
    MissingDialogResponse(MessageKind),
}

/// Failure to encode a typed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// CBOR serializer rejected the value.
    #[error("cbor encode failed: {0}")]
    Cbor(String),
}
