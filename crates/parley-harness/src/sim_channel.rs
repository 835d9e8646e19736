//! Channel delegate with controllable reachability.
//!
//! The engine only asks the channel to accept a message; routing happens in
//! [`crate::SimWorld`] once the execution committed. `SimChannel` decides
//! which posts are accepted and keeps a log of the accepted ones.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use parley_core::{ChannelDelegate, ChannelError, DeliveryHandle};
use parley_proto::{Identity, OutboundMessage, SendChannel};

#[derive(Debug, Default)]
struct ChannelState {
    next_handle: u64,
    unreachable: BTreeSet<Identity>,
    accepted: Vec<(DeliveryHandle, OutboundMessage)>,
}

/// Channel delegate of one device.
#[derive(Debug, Clone, Default)]
pub struct SimChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl SimChannel {
    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().expect("channel mutex poisoned")
    }

    /// Refuse posts to `contact` until [`SimChannel::restore`].
    pub fn cut(&self, contact: Identity) {
        self.lock().unreachable.insert(contact);
    }

    /// Accept posts to `contact` again.
    pub fn restore(&self, contact: &Identity) {
        self.lock().unreachable.remove(contact);
    }

    /// Every accepted post, oldest first.
    pub fn accepted(&self) -> Vec<(DeliveryHandle, OutboundMessage)> {
        self.lock().accepted.clone()
    }
}

impl ChannelDelegate for SimChannel {
    fn post(
        &mut self,
        owned: &Identity,
        message: &OutboundMessage,
    ) -> Result<DeliveryHandle, ChannelError> {
        let mut state = self.lock();
        if let SendChannel::Contacts(contacts) = &message.channel {
            if let Some(target) = contacts.iter().find(|c| state.unreachable.contains(c)) {
                return Err(ChannelError::NoSecureChannel { owned: *owned, target: *target });
            }
        }

        state.next_handle += 1;
        let handle = DeliveryHandle(state.next_handle);
        state.accepted.push((handle, message.clone()));
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::{InstanceId, MessageEnvelope, MessageKind, ProtocolId};

    use super::*;

    fn to(contact: Identity) -> OutboundMessage {
        OutboundMessage::new(
            SendChannel::contact(contact),
            MessageEnvelope::new(ProtocolId(1), InstanceId::from_bytes([0; 32]), MessageKind(0)),
        )
    }

    #[test]
    fn cut_contacts_are_refused_until_restored() {
        let owned = Identity::from_bytes([1; 32]);
        let bob = Identity::from_bytes([2; 32]);
        let mut channel = SimChannel::default();

        channel.cut(bob);
        let refused = channel.post(&owned, &to(bob));
        assert!(matches!(refused, Err(ChannelError::NoSecureChannel { .. })));
        assert!(channel.accepted().is_empty());

        channel.restore(&bob);
        assert_eq!(channel.post(&owned, &to(bob)).unwrap(), DeliveryHandle(1));
        assert_eq!(channel.accepted().len(), 1);
    }
}
