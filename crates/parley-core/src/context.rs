//! Step-facing view of one transaction.
//!
//! A [`StepContext`] is built by the engine for every step invocation. It
//! carries the collaborators the step may use and records every effect the
//! step asks for. Nothing a step does through the context is visible outside
//! the transaction until the engine commits:
//!
//! - posts are checked by the channel delegate immediately (so a step can
//!   react to [`ChannelError`]) but delivered only after commit
//! - one-to-one status changes are staged and applied after commit
//! - parked waiting records go into the transaction's change set

use std::collections::BTreeMap;

use parley_proto::{
    DialogContent, DialogId, Encoded, Identity, InstanceId, MessageEnvelope, MessageKind,
    OutboundMessage, ProtocolId, ReceptionInfo, SendChannel,
};

use crate::{
    delegate::{
        ChannelDelegate, DeliveryHandle, IdentityDelegate, ProtocolStarterDelegate, StartRequest,
    },
    env::Prng,
    error::{ChannelError, IdentityError, LedgerError, StepError},
    ledger::{InstanceKey, WaitingInstance, WaitingLedger, WaitingRecord},
};

/// A message accepted by the channel delegate during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    /// Handle assigned by the channel delegate
    pub handle: DeliveryHandle,
    /// The accepted message
    pub message: OutboundMessage,
}

/// Effects a step recorded, released by the engine after commit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepEffects {
    /// Accepted outbound messages, in post order
    pub posted: Vec<Posted>,
    /// Staged one-to-one status per contact
    pub status_changes: BTreeMap<Identity, bool>,
}

/// Everything a step may touch.
pub struct StepContext<'a> {
    key: InstanceKey,
    reception: Option<ReceptionInfo>,
    channel: &'a mut dyn ChannelDelegate,
    identity: &'a dyn IdentityDelegate,
    starter: &'a dyn ProtocolStarterDelegate,
    ledger: &'a mut dyn WaitingLedger,
    prng: &'a dyn Prng,
    effects: StepEffects,
}

impl<'a> StepContext<'a> {
    /// Context for the instance `key`, running a message that arrived as
    /// described by `reception`.
    pub fn new(
        key: InstanceKey,
        reception: Option<ReceptionInfo>,
        channel: &'a mut dyn ChannelDelegate,
        identity: &'a dyn IdentityDelegate,
        starter: &'a dyn ProtocolStarterDelegate,
        ledger: &'a mut dyn WaitingLedger,
        prng: &'a dyn Prng,
    ) -> Self {
        Self {
            key,
            reception,
            channel,
            identity,
            starter,
            ledger,
            prng,
            effects: StepEffects::default(),
        }
    }

    /// Key of the running instance.
    pub fn key(&self) -> InstanceKey {
        self.key
    }

    /// Identity running the instance.
    pub fn owned_identity(&self) -> Identity {
        self.key.owned
    }

    /// Protocol of the running instance.
    pub fn protocol(&self) -> ProtocolId {
        self.key.protocol
    }

    /// Id of the running instance.
    pub fn instance(&self) -> InstanceId {
        self.key.instance
    }

    /// How the message being processed arrived.
    pub fn reception(&self) -> Option<ReceptionInfo> {
        self.reception
    }

    /// Remote identity behind the channel the message arrived on.
    pub fn remote_identity(&self) -> Option<Identity> {
        self.reception.and_then(|r| r.remote)
    }

    /// Fresh prompt id.
    pub fn new_dialog_id(&self) -> DialogId {
        self.prng.dialog_id()
    }

    /// Fresh protocol run id.
    pub fn new_instance_id(&self) -> InstanceId {
        self.prng.instance_id()
    }

    /// Envelope addressed to this instance.
    pub fn envelope(&self, kind: MessageKind, inputs: Vec<Encoded>) -> MessageEnvelope {
        MessageEnvelope::new(self.key.protocol, self.key.instance, kind).with_inputs(inputs)
    }

    /// Post a message through the channel delegate.
    pub fn post(&mut self, message: OutboundMessage) -> Result<DeliveryHandle, ChannelError> {
        let handle = self.channel.post(&self.key.owned, &message)?;
        self.effects.posted.push(Posted { handle, message });
        Ok(handle)
    }

    /// Post a message for this instance on `channel`.
    pub fn send(
        &mut self,
        channel: SendChannel,
        kind: MessageKind,
        inputs: Vec<Encoded>,
    ) -> Result<DeliveryHandle, ChannelError> {
        let envelope = self.envelope(kind, inputs);
        self.post(OutboundMessage::new(channel, envelope))
    }

    /// Show, update or dismiss a prompt.
    ///
    /// `answer_kind` is the message kind the user's answer will come back
    /// as; irrelevant for [`DialogContent::Delete`].
    pub fn post_dialog(
        &mut self,
        dialog_id: DialogId,
        content: DialogContent,
        answer_kind: MessageKind,
    ) -> Result<DeliveryHandle, ChannelError> {
        self.send(SendChannel::UserInterface { dialog_id, content }, answer_kind, Vec::new())
    }

    /// Whether `contact` is a contact of the owned identity.
    pub fn is_contact(&self, contact: &Identity) -> Result<bool, IdentityError> {
        self.identity.is_contact_of(&self.key.owned, contact)
    }

    /// Whether `contact` is one-to-one, including changes staged by this
    /// step.
    pub fn is_one_to_one(&self, contact: &Identity) -> Result<bool, IdentityError> {
        match self.effects.status_changes.get(contact) {
            Some(staged) => Ok(*staged),
            None => self.identity.is_one_to_one_contact(&self.key.owned, contact),
        }
    }

    /// Stage a one-to-one status change, applied when the transaction
    /// commits.
    pub fn reset_one_to_one_status(&mut self, contact: Identity, one_to_one: bool) {
        self.effects.status_changes.insert(contact, one_to_one);
    }

    /// Number of other devices of the owned identity.
    pub fn other_device_count(&self) -> Result<usize, IdentityError> {
        self.identity.other_device_count(&self.key.owned)
    }

    /// Park this instance until the precondition about `remote` holds.
    pub fn park(&mut self, remote: Identity, pending: MessageKind) -> Result<(), LedgerError> {
        self.ledger.park(WaitingRecord {
            owned: self.key.owned,
            remote,
            protocol: self.key.protocol,
            instance: self.key.instance,
            pending,
        })
    }

    /// Instances of the owned identity parked on `remote`.
    pub fn waiting_for(&self, remote: &Identity) -> Result<Vec<WaitingInstance>, LedgerError> {
        self.ledger.query(&self.key.owned, remote)
    }

    /// Initial message of a fresh protocol run.
    pub fn initial_message_for(
        &self,
        request: &StartRequest,
    ) -> Result<OutboundMessage, StepError> {
        self.starter.initial_message_for(&self.key.owned, request, self.prng)
    }

    /// Effects recorded so far.
    pub fn effects(&self) -> &StepEffects {
        &self.effects
    }

    /// Consume the context, keeping its effects.
    pub fn into_effects(self) -> StepEffects {
        self.effects
    }
}
