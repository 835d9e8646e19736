//! Message envelope.
//!
//! The envelope is what the transport moves around. It names the protocol
//! run it belongs to, the message kind, and an ordered list of encoded
//! inputs that the concrete message type decodes. Two optional annotations
//! ride along: a dialog response (set when the local user answered a prompt)
//! and reception metadata (set by the transport on inbound messages only).

use serde::{Deserialize, Serialize};

use crate::{
    channel::{ReceptionInfo, SendChannel},
    dialog::DialogResponse,
    encoded::Encoded,
    errors::{DecodeError, EncodeError},
    ids::{Identity, InstanceId, MessageKind, ProtocolId},
};

/// Routing header plus encoded inputs of one protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Protocol this message belongs to
    pub protocol: ProtocolId,
    /// Protocol run this message belongs to
    pub instance: InstanceId,
    /// Concrete message tag
    pub kind: MessageKind,
    /// Ordered encoded payload values
    pub inputs: Vec<Encoded>,
    /// User answer to a prompt, if this message carries one
    pub dialog_response: Option<DialogResponse>,
    /// How the message arrived; `None` until the transport attaches it
    pub reception: Option<ReceptionInfo>,
}

impl MessageEnvelope {
    /// Envelope with no inputs and no annotations.
    pub fn new(protocol: ProtocolId, instance: InstanceId, kind: MessageKind) -> Self {
        Self {
            protocol,
            instance,
            kind,
            inputs: Vec::new(),
            dialog_response: None,
            reception: None,
        }
    }

    /// Replace the encoded inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<Encoded>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Attach transport reception metadata.
    #[must_use]
    pub fn received_on(mut self, reception: ReceptionInfo) -> Self {
        self.reception = Some(reception);
        self
    }

    /// Attach a user answer to a prompt.
    #[must_use]
    pub fn answering(mut self, response: DialogResponse) -> Self {
        self.dialog_response = Some(response);
        self
    }

    /// Inputs, checked to be exactly `expected` long.
    pub fn inputs_exact(&self, expected: usize) -> Result<&[Encoded], DecodeError> {
        if self.inputs.len() == expected {
            Ok(&self.inputs)
        } else {
            Err(DecodeError::InputCount { expected, got: self.inputs.len() })
        }
    }

    /// Remote identity attached by the transport, if any.
    pub fn remote_identity(&self) -> Option<Identity> {
        self.reception.and_then(|r| r.remote)
    }

    /// Serialize to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| EncodeError::Cbor(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        ciborium::from_reader(bytes).map_err(|e| DecodeError::Cbor(e.to_string()))
    }
}

/// A message ready for the channel delegate.
///
/// The envelope's `reception` is always `None` here: reception metadata is
/// attached on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Where to send it
    pub channel: SendChannel,
    /// What to send
    pub envelope: MessageEnvelope,
}

impl OutboundMessage {
    /// Build an outbound message, stripping any reception metadata.
    pub fn new(channel: SendChannel, mut envelope: MessageEnvelope) -> Self {
        envelope.reception = None;
        Self { channel, envelope }
    }
}
