//! Wire-adjacent types for the parley protocol engine.
//!
//! Everything in this crate is plain data: identifiers, the inbound/outbound
//! [`MessageEnvelope`], channel kinds and dialog payloads. Nothing here knows
//! about storage, steps or delegates. The engine crates build on top of these
//! types; transports and UIs only ever need this crate.
//!
//! # Encoding
//!
//! Payload values travel as [`Encoded`] elements, each one a self-describing
//! CBOR item. Envelopes themselves serialize to CBOR through
//! [`MessageEnvelope::to_bytes`] and [`MessageEnvelope::from_bytes`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod dialog;
pub mod encoded;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use channel::{ChannelKind, ReceptionInfo, SendChannel};
pub use dialog::{Dialog, DialogContent, DialogId, DialogResponse};
pub use encoded::Encoded;
pub use envelope::{MessageEnvelope, OutboundMessage};
pub use errors::{DecodeError, EncodeError};
pub use ids::{Identity, InstanceId, MessageKind, ProtocolId, StateKind};
