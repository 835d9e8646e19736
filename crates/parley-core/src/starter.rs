//! Default protocol starter.

use parley_proto::{Encoded, Identity, MessageEnvelope, OutboundMessage, SendChannel};

use crate::{
    delegate::{ProtocolStarterDelegate, StartRequest},
    env::Prng,
    error::StepError,
    one_to_one::{OneToOneInvitationProtocol, kind},
    protocol::Protocol,
};

/// Builds initial messages for the protocols hosted by this crate.
///
/// Every request starts a fresh instance. Invitations and status syncs
/// loop back into the local engine; a downgrade is announced directly to
/// the contact as a negative [`kind::ONE_TO_ONE_RESPONSE`], which the
/// contact handles as an unexpected response.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProtocolStarter;

impl ProtocolStarterDelegate for DefaultProtocolStarter {
    fn initial_message_for(
        &self,
        _owned: &Identity,
        request: &StartRequest,
        prng: &dyn Prng,
    ) -> Result<OutboundMessage, StepError> {
        let instance = prng.instance_id();
        let envelope =
            |message| MessageEnvelope::new(OneToOneInvitationProtocol::ID, instance, message);

        let message = match request {
            StartRequest::OneToOneInvitation { contact } => OutboundMessage::new(
                SendChannel::Local,
                envelope(kind::INITIAL).with_inputs(vec![Encoded::encode(contact)?]),
            ),
            StartRequest::DowngradeOneToOne { contact } => OutboundMessage::new(
                SendChannel::contact(*contact),
                envelope(kind::ONE_TO_ONE_RESPONSE).with_inputs(vec![Encoded::encode(&false)?]),
            ),
            StartRequest::OneToOneStatusSync { contacts } => OutboundMessage::new(
                SendChannel::Local,
                envelope(kind::INITIAL_ONE_TO_ONE_STATUS_SYNC_REQUEST)
                    .with_inputs(vec![Encoded::encode(contacts)?]),
            ),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::BTreeSet};

    use parley_proto::{InstanceId, MessageKind};

    use super::*;

    struct Counter(Cell<u8>);

    impl Prng for Counter {
        fn fill(&self, buffer: &mut [u8]) {
            let next = self.0.get().wrapping_add(1);
            self.0.set(next);
            buffer.fill(next);
        }
    }

    fn start(request: &StartRequest, prng: &Counter) -> OutboundMessage {
        DefaultProtocolStarter
            .initial_message_for(&Identity::from_bytes([1; 32]), request, prng)
            .unwrap()
    }

    #[test]
    fn each_request_starts_a_fresh_instance() {
        let prng = Counter(Cell::new(0));
        let bob = Identity::from_bytes([2; 32]);
        let first = start(&StartRequest::OneToOneInvitation { contact: bob }, &prng);
        let second = start(&StartRequest::OneToOneInvitation { contact: bob }, &prng);
        assert_eq!(first.envelope.instance, InstanceId::from_bytes([1; 32]));
        assert_ne!(first.envelope.instance, second.envelope.instance);
        assert_eq!(first.channel, SendChannel::Local);
    }

    #[test]
    fn downgrade_is_a_negative_response_to_the_contact() {
        let prng = Counter(Cell::new(0));
        let bob = Identity::from_bytes([2; 32]);
        let out = start(&StartRequest::DowngradeOneToOne { contact: bob }, &prng);
        assert_eq!(out.channel, SendChannel::contact(bob));
        assert_eq!(out.envelope.kind, kind::ONE_TO_ONE_RESPONSE);
        assert!(!out.envelope.inputs[0].decode::<bool>().unwrap());
    }

    #[test]
    fn status_sync_carries_the_contact_set() {
        let prng = Counter(Cell::new(0));
        let contacts: BTreeSet<_> =
            [Identity::from_bytes([2; 32]), Identity::from_bytes([3; 32])].into_iter().collect();
        let out = start(&StartRequest::OneToOneStatusSync { contacts: contacts.clone() }, &prng);
        assert_eq!(out.envelope.kind, MessageKind(10));
        assert_eq!(out.envelope.inputs[0].decode::<BTreeSet<Identity>>().unwrap(), contacts);
    }
}
