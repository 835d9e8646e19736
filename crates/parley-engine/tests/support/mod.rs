//! Shared collaborators for engine tests.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use parley_core::{
    ChannelDelegate, ChannelError, DefaultProtocolStarter, Delegates, DeliveryHandle, Environment,
    IdentityDelegate, IdentityError, InstanceKey, StatusChange, WaitingRecord,
    one_to_one::{self, InvitationConfig},
};
use parley_engine::{ChangeSet, Engine, EngineConfig, Storage, StorageError, StoredInstance};
use parley_proto::{DialogContent, Identity, OutboundMessage, SendChannel};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub fn identity(byte: u8) -> Identity {
    Identity::from_bytes([byte; 32])
}

/// Seeded randomness, frozen clock.
#[derive(Clone)]
pub struct TestEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl TestEnv {
    pub fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Environment for TestEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::ZERO
    }

    fn wall_clock_secs(&self) -> u64 {
        1_700_000_000
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

/// Accepts every post unless the target is in `refused`; keeps a log.
#[derive(Clone, Default)]
pub struct SharedChannel {
    pub posts: Arc<Mutex<Vec<OutboundMessage>>>,
    pub refused: Arc<Mutex<BTreeSet<Identity>>>,
}

impl SharedChannel {
    pub fn refuse(&self, contact: Identity) {
        self.refused.lock().unwrap().insert(contact);
    }
}

impl ChannelDelegate for SharedChannel {
    fn post(
        &mut self,
        owned: &Identity,
        message: &OutboundMessage,
    ) -> Result<DeliveryHandle, ChannelError> {
        if let SendChannel::Contacts(contacts) = &message.channel {
            let refused = self.refused.lock().unwrap();
            if let Some(target) = contacts.iter().find(|c| refused.contains(c)) {
                return Err(ChannelError::NoSecureChannel { owned: *owned, target: *target });
            }
        }
        let mut posts = self.posts.lock().unwrap();
        posts.push(message.clone());
        Ok(DeliveryHandle(posts.len() as u64))
    }
}

/// Contact book of one owned identity: contact -> one-to-one.
#[derive(Clone, Default)]
pub struct SharedBook {
    pub contacts: Arc<Mutex<BTreeMap<Identity, bool>>>,
    pub broken: Arc<Mutex<bool>>,
}

impl SharedBook {
    /// Make every status reset fail until `repair`.
    pub fn break_resets(&self) {
        *self.broken.lock().unwrap() = true;
    }

    pub fn repair(&self) {
        *self.broken.lock().unwrap() = false;
    }

    pub fn with_contact(self, contact: Identity, one_to_one: bool) -> Self {
        self.set(contact, one_to_one);
        self
    }

    pub fn set(&self, contact: Identity, one_to_one: bool) {
        self.contacts.lock().unwrap().insert(contact, one_to_one);
    }

    pub fn get(&self, contact: &Identity) -> Option<bool> {
        self.contacts.lock().unwrap().get(contact).copied()
    }
}

impl IdentityDelegate for SharedBook {
    fn is_contact_of(&self, _: &Identity, contact: &Identity) -> Result<bool, IdentityError> {
        Ok(self.contacts.lock().unwrap().contains_key(contact))
    }

    fn is_one_to_one_contact(
        &self,
        _: &Identity,
        contact: &Identity,
    ) -> Result<bool, IdentityError> {
        Ok(self.get(contact).unwrap_or(false))
    }

    fn reset_one_to_one_contact_status(
        &mut self,
        _: &Identity,
        contact: &Identity,
        one_to_one: bool,
    ) -> Result<StatusChange, IdentityError> {
        if *self.broken.lock().unwrap() {
            return Err(IdentityError::Database("contact book locked".to_string()));
        }
        let mut contacts = self.contacts.lock().unwrap();
        let Some(current) = contacts.get_mut(contact) else {
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
        Ok(0)
    }
}

/// Storage that rejects every commit while `closed` is set.
#[derive(Clone)]
pub struct GatedStorage<S> {
    pub inner: S,
    pub closed: Arc<Mutex<bool>>,
}

impl<S: Storage> GatedStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, closed: Arc::new(Mutex::new(false)) }
    }

    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    pub fn open(&self) {
        *self.closed.lock().unwrap() = false;
    }
}

impl<S: Storage> Storage for GatedStorage<S> {
    fn load_instance(&self, key: &InstanceKey) -> Result<Option<StoredInstance>, StorageError> {
        self.inner.load_instance(key)
    }

    fn list_instances(&self) -> Result<Vec<(InstanceKey, StoredInstance)>, StorageError> {
        self.inner.list_instances()
    }

    fn waiting_for(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingRecord>, StorageError> {
        self.inner.waiting_for(owned, remote)
    }

    fn list_waiting(&self) -> Result<Vec<WaitingRecord>, StorageError> {
        self.inner.list_waiting()
    }

    fn is_terminated(&self, key: &InstanceKey) -> Result<bool, StorageError> {
        self.inner.is_terminated(key)
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        if *self.closed.lock().unwrap() {
            return Err(StorageError::Io("gate closed".to_string()));
        }
        self.inner.commit(changes)
    }
}

/// Engine hosting the invitation protocol with shared collaborators.
pub fn engine<S: Storage>(
    storage: S,
    book: &SharedBook,
    channel: &SharedChannel,
    config: EngineConfig,
) -> Engine<TestEnv, S> {
    let delegates = Delegates::builder()
        .channel(channel.clone())
        .identity(book.clone())
        .starter(DefaultProtocolStarter)
        .build()
        .unwrap();
    let registry = one_to_one::registry(InvitationConfig::default()).unwrap();
    Engine::new(TestEnv::new(11), storage, registry, delegates, config)
}

/// Prompt updates among `posts`, in order.
pub fn dialog_contents(posts: &[parley_core::Posted]) -> Vec<&DialogContent> {
    posts
        .iter()
        .filter_map(|p| match &p.message.channel {
            SendChannel::UserInterface { content, .. } => Some(content),
            _ => None,
        })
        .collect()
}
