//! States of the one-to-one invitation protocol.
//!
//! Unit states persist as an empty blob; the two waiting states persist
//! their fields as a CBOR map.

use parley_proto::{DecodeError, DialogId, EncodeError, Identity, StateKind};
use serde::{Deserialize, Serialize};

use super::{OneToOneInvitationProtocol, state_kind};
use crate::protocol::{Protocol, ProtocolState};

/// Every state an instance can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneToOneState {
    /// Freshly born; never persisted.
    Initial,
    /// We invited `contact` and wait for their answer.
    InvitationSent {
        /// Invited contact
        contact: Identity,
        /// "Invitation sent" prompt
        dialog_id: DialogId,
    },
    /// `contact` invited us and we wait for the local user.
    InvitationReceived {
        /// Inviting contact
        contact: Identity,
        /// "Invitation received" prompt
        dialog_id: DialogId,
    },
    /// Ended normally.
    Finished,
    /// Ended because the run could not continue.
    Cancelled,
}

#[derive(Serialize, Deserialize)]
struct Pending {
    contact: Identity,
    dialog_id: DialogId,
}

fn to_cbor(pending: &Pending) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    ciborium::into_writer(pending, &mut buf).map_err(|e| EncodeError::Cbor(e.to_string()))?;
    Ok(buf)
}

fn from_cbor(blob: &[u8]) -> Result<Pending, DecodeError> {
    ciborium::from_reader(blob).map_err(|e| DecodeError::Cbor(e.to_string()))
}

fn expect_empty(blob: &[u8]) -> Result<(), DecodeError> {
    if blob.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::Cbor(format!("unit state carries {} trailing bytes", blob.len())))
    }
}

impl ProtocolState for OneToOneState {
    fn initial() -> Self {
        Self::Initial
    }

    fn kind(&self) -> StateKind {
        match self {
            Self::Initial => state_kind::INITIAL,
            Self::InvitationSent { .. } => state_kind::INVITATION_SENT,
            Self::InvitationReceived { .. } => state_kind::INVITATION_RECEIVED,
            Self::Finished => state_kind::FINISHED,
            Self::Cancelled => state_kind::CANCELLED,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match *self {
            Self::InvitationSent { contact, dialog_id }
            | Self::InvitationReceived { contact, dialog_id } => {
                to_cbor(&Pending { contact, dialog_id })
            },
            Self::Initial | Self::Finished | Self::Cancelled => Ok(Vec::new()),
        }
    }

    fn decode(kind: StateKind, blob: &[u8]) -> Result<Self, DecodeError> {
        let state = match kind {
            state_kind::INITIAL => {
                expect_empty(blob)?;
                Self::Initial
            },
            state_kind::INVITATION_SENT => {
                let Pending { contact, dialog_id } = from_cbor(blob)?;
                Self::InvitationSent { contact, dialog_id }
            },
            state_kind::INVITATION_RECEIVED => {
                let Pending { contact, dialog_id } = from_cbor(blob)?;
                Self::InvitationReceived { contact, dialog_id }
            },
            state_kind::FINISHED => {
                expect_empty(blob)?;
                Self::Finished
            },
            state_kind::CANCELLED => {
                expect_empty(blob)?;
                Self::Cancelled
            },
            other => {
                return Err(DecodeError::UnknownStateKind {
                    protocol: OneToOneInvitationProtocol::ID,
                    kind: other,
                });
            },
        };
        Ok(state)
    }
}
