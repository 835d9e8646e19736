//! In-memory collaborators for running single steps.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
};

use parley_core::{
    ChannelDelegate, ChannelError, DefaultProtocolStarter, DeliveryHandle, IdentityDelegate,
    IdentityError, InstanceKey, LedgerError, Prng, ProtocolRegistry, ProtocolState, RunError,
    StatusChange, StepContext, StepEffects, StepRun, StoredState, WaitingInstance, WaitingLedger,
    WaitingRecord,
};
use parley_proto::{
    DialogContent, Identity, MessageEnvelope, OutboundMessage, SendChannel, StateKind,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub fn identity(byte: u8) -> Identity {
    Identity::from_bytes([byte; 32])
}

/// Accepts everything except posts to `refused` contacts or sibling devices
/// when `refuse_owned_devices` is set.
#[derive(Default)]
pub struct RecordingChannel {
    next: u64,
    pub refused: BTreeSet<Identity>,
    pub refuse_owned_devices: bool,
}

impl ChannelDelegate for RecordingChannel {
    fn post(
        &mut self,
        owned: &Identity,
        message: &OutboundMessage,
    ) -> Result<DeliveryHandle, ChannelError> {
        match &message.channel {
            SendChannel::Contacts(contacts) => {
                if let Some(target) = contacts.iter().find(|c| self.refused.contains(c)) {
                    return Err(ChannelError::NoSecureChannel { owned: *owned, target: *target });
                }
            },
            SendChannel::OwnedDevices if self.refuse_owned_devices => {
                return Err(ChannelError::NoOtherDevice(*owned));
            },
            _ => {},
        }
        self.next += 1;
        Ok(DeliveryHandle(self.next))
    }
}

/// Contact book of the owned identity: contact -> one-to-one.
#[derive(Default)]
pub struct Book {
    pub contacts: BTreeMap<Identity, bool>,
    pub other_devices: usize,
}

impl IdentityDelegate for Book {
    fn is_contact_of(&self, _: &Identity, contact: &Identity) -> Result<bool, IdentityError> {
        Ok(self.contacts.contains_key(contact))
    }

    fn is_one_to_one_contact(
        &self,
        _: &Identity,
        contact: &Identity,
    ) -> Result<bool, IdentityError> {
        Ok(self.contacts.get(contact).copied().unwrap_or(false))
    }

    fn reset_one_to_one_contact_status(
        &mut self,
        _: &Identity,
        contact: &Identity,
        one_to_one: bool,
    ) -> Result<StatusChange, IdentityError> {
        let Some(current) = self.contacts.get_mut(contact) else {
            return Ok(StatusChange::Unchanged);
        };
        let change = match (*current, one_to_one) {
            (false, true) => StatusChange::Upgraded,
            (true, false) => StatusChange::Downgraded,
            _ => StatusChange::Unchanged,
        };
        *current = one_to_one;
        Ok(change)
    }

    fn other_device_count(&self, _: &Identity) -> Result<usize, IdentityError> {
        Ok(self.other_devices)
    }
}

#[derive(Default)]
pub struct Ledger {
    pub entries: Vec<WaitingInstance>,
}

impl Ledger {
    /// Pretend an earlier run of ours is parked on `remote` in `state`.
    pub fn seed(&mut self, record: WaitingRecord, state: StateKind) {
        self.entries.push(WaitingInstance { record, state: Some(state) });
    }
}

impl WaitingLedger for Ledger {
    fn park(&mut self, record: WaitingRecord) -> Result<(), LedgerError> {
        self.entries.push(WaitingInstance { record, state: None });
        Ok(())
    }

    fn query(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingInstance>, LedgerError> {
        Ok(self
            .entries
            .iter()
            .filter(|w| w.record.owned == *owned && w.record.remote == *remote)
            .copied()
            .collect())
    }
}

pub struct TestPrng(RefCell<ChaCha8Rng>);

impl TestPrng {
    pub fn new(seed: u64) -> Self {
        Self(RefCell::new(ChaCha8Rng::seed_from_u64(seed)))
    }
}

impl Prng for TestPrng {
    fn fill(&self, buffer: &mut [u8]) {
        self.0.borrow_mut().fill_bytes(buffer);
    }
}

/// One device running one step at a time.
pub struct Device {
    pub owned: Identity,
    pub channel: RecordingChannel,
    pub book: Book,
    pub ledger: Ledger,
    pub prng: TestPrng,
}

impl Device {
    pub fn new(owned: Identity) -> Self {
        Self {
            owned,
            channel: RecordingChannel::default(),
            book: Book::default(),
            ledger: Ledger::default(),
            prng: TestPrng::new(7),
        }
    }

    pub fn with_contact(mut self, contact: Identity, one_to_one: bool) -> Self {
        self.book.contacts.insert(contact, one_to_one);
        self
    }

    pub fn run(
        &mut self,
        registry: &ProtocolRegistry,
        stored: Option<&StoredState>,
        envelope: &MessageEnvelope,
    ) -> (Result<StepRun, RunError>, StepEffects) {
        let key = InstanceKey {
            protocol: envelope.protocol,
            instance: envelope.instance,
            owned: self.owned,
        };
        let mut ctx = StepContext::new(
            key,
            envelope.reception,
            &mut self.channel,
            &self.book,
            &DefaultProtocolStarter,
            &mut self.ledger,
            &self.prng,
        );
        let run = match registry.get(envelope.protocol) {
            Ok(hosted) => hosted.run(stored, envelope, &mut ctx),
            Err(err) => Err(RunError::Decode(err)),
        };
        (run, ctx.into_effects())
    }
}

pub fn stored<S: ProtocolState>(state: &S) -> StoredState {
    StoredState { kind: state.kind(), blob: state.encode().unwrap() }
}

/// Posted messages that are not prompt updates.
pub fn network_posts(effects: &StepEffects) -> Vec<&OutboundMessage> {
    effects
        .posted
        .iter()
        .map(|p| &p.message)
        .filter(|m| !matches!(m.channel, SendChannel::UserInterface { .. }))
        .collect()
}

/// Prompt updates, in post order.
pub fn dialog_posts(effects: &StepEffects) -> Vec<&DialogContent> {
    effects
        .posted
        .iter()
        .filter_map(|p| match &p.message.channel {
            SendChannel::UserInterface { content, .. } => Some(content),
            _ => None,
        })
        .collect()
}
