//! Messages of the one-to-one invitation protocol.

use std::collections::BTreeSet;

use parley_proto::{DecodeError, EncodeError, Encoded, Identity, MessageEnvelope, MessageKind};

use super::{OneToOneInvitationProtocol, kind};
use crate::protocol::{Protocol, ProtocolMessage};

/// Every message the protocol understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneToOneMessage {
    /// Programmatic start: invite `contact`.
    Initial {
        /// Contact to invite
        contact: Identity,
    },
    /// Invitation, sent to every device of the contact.
    OneToOneInvitation,
    /// Answer to the "invitation sent" prompt.
    DialogInvitationSent {
        /// Whether the user cancelled the invitation
        cancel: bool,
    },
    /// Invitation started on a sibling device.
    PropagateOneToOneInvitation {
        /// Invited contact
        contact: Identity,
    },
    /// Answer to the "invitation received" prompt.
    DialogAcceptOneToOneInvitation {
        /// Whether the user accepted
        accepted: bool,
    },
    /// Invitee's answer. Also used outside an invitation to tell a contact
    /// how we see them.
    OneToOneResponse {
        /// Whether the sender considers the recipient one-to-one
        accepted: bool,
    },
    /// Answer given on a sibling device.
    PropagateOneToOneResponse {
        /// Whether the sibling accepted
        accepted: bool,
    },
    /// Inviter cancelled.
    Abort,
    /// Replayed locally once the contact became one-to-one.
    ContactUpgradedToOneToOne,
    /// Cancellation decided on a sibling device.
    PropagateAbort,
    /// Programmatic start: compare status with each of `contacts`.
    InitialOneToOneStatusSyncRequest {
        /// Contacts to sync with
        contacts: BTreeSet<Identity>,
    },
    /// Sender's view of the recipient's status.
    OneToOneStatusSyncRequest {
        /// Whether the sender considers the recipient one-to-one
        alice_considers_bob_one_to_one: bool,
    },
}

fn single(envelope: &MessageEnvelope) -> Result<&Encoded, DecodeError> {
    match envelope.inputs_exact(1)? {
        [value] => Ok(value),
        other => Err(DecodeError::InputCount { expected: 1, got: other.len() }),
    }
}

fn none(envelope: &MessageEnvelope) -> Result<(), DecodeError> {
    envelope.inputs_exact(0).map(|_| ())
}

fn dialog_answer(envelope: &MessageEnvelope) -> Result<bool, DecodeError> {
    let response = envelope
        .dialog_response
        .as_ref()
        .ok_or(DecodeError::MissingDialogResponse(envelope.kind))?;
    response.response.decode()
}

impl ProtocolMessage for OneToOneMessage {
    fn kind(&self) -> MessageKind {
        match self {
            Self::Initial { .. } => kind::INITIAL,
            Self::OneToOneInvitation => kind::ONE_TO_ONE_INVITATION,
            Self::DialogInvitationSent { .. } => kind::DIALOG_INVITATION_SENT,
            Self::PropagateOneToOneInvitation { .. } => kind::PROPAGATE_ONE_TO_ONE_INVITATION,
            Self::DialogAcceptOneToOneInvitation { .. } => {
                kind::DIALOG_ACCEPT_ONE_TO_ONE_INVITATION
            },
            Self::OneToOneResponse { .. } => kind::ONE_TO_ONE_RESPONSE,
            Self::PropagateOneToOneResponse { .. } => kind::PROPAGATE_ONE_TO_ONE_RESPONSE,
            Self::Abort => kind::ABORT,
            Self::ContactUpgradedToOneToOne => kind::CONTACT_UPGRADED_TO_ONE_TO_ONE,
            Self::PropagateAbort => kind::PROPAGATE_ABORT,
            Self::InitialOneToOneStatusSyncRequest { .. } => {
                kind::INITIAL_ONE_TO_ONE_STATUS_SYNC_REQUEST
            },
            Self::OneToOneStatusSyncRequest { .. } => kind::ONE_TO_ONE_STATUS_SYNC_REQUEST,
        }
    }

    fn decode(envelope: &MessageEnvelope) -> Result<Self, DecodeError> {
        let message = match envelope.kind {
            kind::INITIAL => Self::Initial { contact: single(envelope)?.decode()? },
            kind::ONE_TO_ONE_INVITATION => {
                none(envelope)?;
                Self::OneToOneInvitation
            },
            kind::DIALOG_INVITATION_SENT => {
                Self::DialogInvitationSent { cancel: dialog_answer(envelope)? }
            },
            kind::PROPAGATE_ONE_TO_ONE_INVITATION => {
                Self::PropagateOneToOneInvitation { contact: single(envelope)?.decode()? }
            },
            kind::DIALOG_ACCEPT_ONE_TO_ONE_INVITATION => {
                Self::DialogAcceptOneToOneInvitation { accepted: dialog_answer(envelope)? }
            },
            kind::ONE_TO_ONE_RESPONSE => {
                Self::OneToOneResponse { accepted: single(envelope)?.decode()? }
            },
            kind::PROPAGATE_ONE_TO_ONE_RESPONSE => {
                Self::PropagateOneToOneResponse { accepted: single(envelope)?.decode()? }
            },
            kind::ABORT => {
                none(envelope)?;
                Self::Abort
            },
            kind::CONTACT_UPGRADED_TO_ONE_TO_ONE => {
                none(envelope)?;
                Self::ContactUpgradedToOneToOne
            },
            kind::PROPAGATE_ABORT => {
                none(envelope)?;
                Self::PropagateAbort
            },
            kind::INITIAL_ONE_TO_ONE_STATUS_SYNC_REQUEST => {
                Self::InitialOneToOneStatusSyncRequest { contacts: single(envelope)?.decode()? }
            },
            kind::ONE_TO_ONE_STATUS_SYNC_REQUEST => Self::OneToOneStatusSyncRequest {
                alice_considers_bob_one_to_one: single(envelope)?.decode()?,
            },
            other => {
                return Err(DecodeError::UnknownMessageKind {
                    protocol: OneToOneInvitationProtocol::ID,
                    kind: other,
                });
            },
        };
        Ok(message)
    }

    fn encode_inputs(&self) -> Result<Vec<Encoded>, EncodeError> {
        let inputs = match self {
            Self::Initial { contact } | Self::PropagateOneToOneInvitation { contact } => {
                vec![Encoded::encode(contact)?]
            },
            Self::OneToOneResponse { accepted } | Self::PropagateOneToOneResponse { accepted } => {
                vec![Encoded::encode(accepted)?]
            },
            Self::InitialOneToOneStatusSyncRequest { contacts } => vec![Encoded::encode(contacts)?],
            Self::OneToOneStatusSyncRequest { alice_considers_bob_one_to_one } => {
                vec![Encoded::encode(alice_considers_bob_one_to_one)?]
            },
            // Dialog answers travel in the envelope's dialog response.
            Self::OneToOneInvitation
            | Self::DialogInvitationSent { .. }
            | Self::DialogAcceptOneToOneInvitation { .. }
            | Self::Abort
            | Self::ContactUpgradedToOneToOne
            | Self::PropagateAbort => Vec::new(),
        };
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::{DialogId, DialogResponse, InstanceId};

    use super::*;

    fn envelope(kind: MessageKind) -> MessageEnvelope {
        MessageEnvelope::new(OneToOneInvitationProtocol::ID, InstanceId::from_bytes([4; 32]), kind)
    }

    fn wrap(message: &OneToOneMessage) -> MessageEnvelope {
        envelope(message.kind()).with_inputs(message.encode_inputs().unwrap())
    }

    #[test]
    fn input_carrying_messages_decode_from_their_inputs() {
        let alice = Identity::from_bytes([1; 32]);
        let bob = Identity::from_bytes([2; 32]);
        let messages = [
            OneToOneMessage::Initial { contact: bob },
            OneToOneMessage::OneToOneInvitation,
            OneToOneMessage::PropagateOneToOneInvitation { contact: bob },
            OneToOneMessage::OneToOneResponse { accepted: true },
            OneToOneMessage::PropagateOneToOneResponse { accepted: false },
            OneToOneMessage::Abort,
            OneToOneMessage::ContactUpgradedToOneToOne,
            OneToOneMessage::PropagateAbort,
            OneToOneMessage::InitialOneToOneStatusSyncRequest {
                contacts: [alice, bob].into_iter().collect(),
            },
            OneToOneMessage::OneToOneStatusSyncRequest { alice_considers_bob_one_to_one: true },
        ];
        for message in messages {
            assert_eq!(OneToOneMessage::decode(&wrap(&message)).unwrap(), message);
        }
    }

    #[test]
    fn dialog_answers_come_from_the_dialog_response() {
        let dialog_id = DialogId::from_random_bytes([3; 16]);
        let env = envelope(kind::DIALOG_ACCEPT_ONE_TO_ONE_INVITATION).answering(DialogResponse {
            dialog_id,
            response: Encoded::encode(&true).unwrap(),
        });
        assert_eq!(
            OneToOneMessage::decode(&env).unwrap(),
            OneToOneMessage::DialogAcceptOneToOneInvitation { accepted: true }
        );

        let env = envelope(kind::DIALOG_INVITATION_SENT).answering(DialogResponse {
            dialog_id,
            response: Encoded::encode(&false).unwrap(),
        });
        assert_eq!(
            OneToOneMessage::decode(&env).unwrap(),
            OneToOneMessage::DialogInvitationSent { cancel: false }
        );
    }

    #[test]
    fn dialog_kind_without_response_is_rejected() {
        let result = OneToOneMessage::decode(&envelope(kind::DIALOG_INVITATION_SENT));
        assert_eq!(result, Err(DecodeError::MissingDialogResponse(kind::DIALOG_INVITATION_SENT)));
    }

    #[test]
    fn wrong_input_count_is_rejected() {
        let result = OneToOneMessage::decode(&envelope(kind::ONE_TO_ONE_RESPONSE));
        assert_eq!(result, Err(DecodeError::InputCount { expected: 1, got: 0 }));

        let env = envelope(kind::ABORT).with_inputs(vec![Encoded::encode(&1u8).unwrap()]);
        assert_eq!(
            OneToOneMessage::decode(&env),
            Err(DecodeError::InputCount { expected: 0, got: 1 })
        );
    }

    #[test]
    fn wrongly_typed_input_is_rejected() {
        let env = envelope(kind::ONE_TO_ONE_RESPONSE)
            .with_inputs(vec![Encoded::encode("yes").unwrap()]);
        assert!(matches!(OneToOneMessage::decode(&env), Err(DecodeError::Cbor(_))));
    }

    #[test]
    fn unknown_and_informative_kinds_are_rejected() {
        for unknown in [kind::DIALOG_INFORMATIVE, MessageKind(12), MessageKind(999)] {
            assert_eq!(
                OneToOneMessage::decode(&envelope(unknown)),
                Err(DecodeError::UnknownMessageKind {
                    protocol: OneToOneInvitationProtocol::ID,
                    kind: unknown,
                })
            );
        }
    }
}
