//! Simulated world: devices, their engines, and the network between them.
//!
//! Every device runs its own [`EngineDriver`] over its own
//! [`MemoryStorage`], contact book and channel. Actions a driver returns are
//! routed by the world: contact and sibling messages go into one in-flight
//! queue, prompt updates land on the sending device's screen, local
//! messages and resolution requests are fed straight back to the device.
//!
//! Tests control the network explicitly: deliver in order, deliver a chosen
//! message, duplicate or drop one, or let the world's seeded RNG pick.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
    time::Duration,
};

use parley_core::{
    DefaultProtocolStarter, Delegates, InstanceKey, StartRequest,
    one_to_one::{self, InvitationConfig},
};
use parley_engine::{
    Engine, EngineAction, EngineConfig, EngineDriver, EngineEvent, MemoryStorage, Storage,
};
use parley_proto::{
    Dialog, DialogContent, DialogId, DialogResponse, Encoded, Identity, InstanceId,
    MessageEnvelope, MessageKind, OutboundMessage, ProtocolId, ReceptionInfo, SendChannel,
};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, warn};

use crate::{
    SimChannel, SimEnv, SimIdentityBook,
    invariants::{DeviceSnapshot, InstanceSnapshot, InvariantRegistry, SystemSnapshot},
};

/// Upper bound for [`SimWorld::deliver_all`]; reaching it means two
/// devices keep answering each other.
pub const MAX_DELIVERIES: usize = 10_000;

/// Virtual time that passes per delivered message.
const TICK: Duration = Duration::from_millis(10);

/// Index of a device in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

/// A prompt on a device's screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownDialog {
    /// Protocol of the instance that raised it
    pub protocol: ProtocolId,
    /// Instance that raised it
    pub instance: InstanceId,
    /// Message kind the answer is delivered as
    pub answer: MessageKind,
    /// What is shown
    pub dialog: Dialog,
}

impl ShownDialog {
    /// Key of the raising instance on a device of `owned`.
    pub fn key(&self, owned: Identity) -> InstanceKey {
        InstanceKey { protocol: self.protocol, instance: self.instance, owned }
    }
}

/// A message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Receiving device
    pub to: DeviceId,
    /// Identity of the receiving device
    pub owned: Identity,
    /// The message, reception metadata attached
    pub envelope: MessageEnvelope,
}

/// Errors from driving the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No device with this id.
    UnknownDevice(DeviceId),
    /// The device shows no such prompt.
    UnknownDialog {
        /// Device asked
        device: DeviceId,
        /// Missing prompt
        dialog_id: DialogId,
    },
    /// No in-flight message at this position.
    NoSuchMessage(usize),
    /// A dialog answer could not be encoded.
    Encode(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice(device) => write!(f, "unknown device {device}"),
            Self::UnknownDialog { device, dialog_id } => {
                write!(f, "{device} shows no dialog {dialog_id}")
            },
            Self::NoSuchMessage(index) => write!(f, "no in-flight message at {index}"),
            Self::Encode(msg) => write!(f, "encode failed: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}

/// One simulated device.
pub struct SimDevice {
    id: DeviceId,
    owned: Identity,
    env: SimEnv,
    driver: EngineDriver<SimEnv, MemoryStorage>,
    storage: MemoryStorage,
    book: SimIdentityBook,
    channel: SimChannel,
    dialogs: BTreeMap<DialogId, ShownDialog>,
    finished: BTreeSet<InstanceKey>,
    errors: Vec<String>,
}

impl SimDevice {
    /// Device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Identity this device belongs to.
    pub fn owned(&self) -> Identity {
        self.owned
    }

    /// The device's storage.
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// The device's contact book.
    pub fn book(&self) -> &SimIdentityBook {
        &self.book
    }

    /// The device's channel delegate.
    pub fn channel(&self) -> &SimChannel {
        &self.channel
    }

    /// Prompts currently shown.
    pub fn dialogs(&self) -> &BTreeMap<DialogId, ShownDialog> {
        &self.dialogs
    }

    /// Instances reported finished so far.
    pub fn finished(&self) -> &BTreeSet<InstanceKey> {
        &self.finished
    }

    /// Engine errors so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// The device's driver.
    pub fn driver(&self) -> &EngineDriver<SimEnv, MemoryStorage> {
        &self.driver
    }

    /// One-to-one status of `contact` in this device's book.
    pub fn one_to_one(&self, contact: &Identity) -> Option<bool> {
        self.book.one_to_one(contact)
    }

    fn snapshot(&self) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot::new(self.id, self.owned);
        snapshot.dialogs = self.dialogs.clone();
        snapshot.contacts = self.book.contacts();
        snapshot.errors = self.errors.clone();

        let registry = self.driver.engine().registry();
        match self.storage.list_instances() {
            Ok(rows) => {
                snapshot.instances = rows
                    .into_iter()
                    .map(|(key, stored)| InstanceSnapshot {
                        key,
                        state: stored.state.kind,
                        revision: stored.revision,
                        terminal: registry
                            .get(key.protocol)
                            .ok()
                            .and_then(|hosted| hosted.is_terminal(stored.state.kind))
                            == Some(true),
                    })
                    .collect();
            },
            Err(err) => snapshot.errors.push(format!("snapshot: {err}")),
        }
        match self.storage.list_waiting() {
            Ok(records) => snapshot.waiting = records,
            Err(err) => snapshot.errors.push(format!("snapshot: {err}")),
        }
        snapshot
    }
}

/// Deterministic multi-device world.
pub struct SimWorld {
    env: SimEnv,
    rng: ChaCha8Rng,
    engine_config: EngineConfig,
    invitation: InvitationConfig,
    devices: Vec<SimDevice>,
    network: VecDeque<InFlight>,
    delivered: Vec<InFlight>,
    invariants: Option<InvariantRegistry>,
}

impl SimWorld {
    /// Empty world; everything random derives from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            rng: ChaCha8Rng::seed_from_u64(seed),
            engine_config: EngineConfig::default(),
            invitation: InvitationConfig::default(),
            devices: Vec::new(),
            network: VecDeque::new(),
            delivered: Vec::new(),
            invariants: None,
        }
    }

    /// Engine configuration for devices added from now on.
    #[must_use]
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Protocol tunables for devices added from now on.
    #[must_use]
    pub fn with_invitation_config(mut self, config: InvitationConfig) -> Self {
        self.invitation = config;
        self
    }

    /// Check these invariants after every processed event.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Add a device of `owned`. It inherits the contacts of its siblings.
    pub fn add_device(&mut self, owned: Identity) -> DeviceId {
        let id = DeviceId(self.devices.len());
        let env = self.env.fork(self.rng.next_u64());
        let storage = MemoryStorage::new();
        let book = SimIdentityBook::default();
        let channel = SimChannel::default();

        if let Some(sibling) = self.devices.iter().find(|d| d.owned == owned) {
            for (contact, one_to_one) in sibling.book.contacts() {
                book.set_one_to_one(contact, one_to_one);
            }
        }

        let driver = self.build_driver(&env, &storage, &book, &channel);
        self.devices.push(SimDevice {
            id,
            owned,
            env,
            driver,
            storage,
            book,
            channel,
            dialogs: BTreeMap::new(),
            finished: BTreeSet::new(),
            errors: Vec::new(),
        });

        let siblings = self.devices_of(&owned);
        for sibling in &siblings {
            self.devices[sibling.0].book.set_other_devices(siblings.len() - 1);
        }
        debug!(%id, %owned, devices = siblings.len(), "device added");
        id
    }

    /// Make `a` and `b` contacts (not one-to-one) on all their devices.
    pub fn befriend(&mut self, a: Identity, b: Identity) {
        for device in &self.devices {
            if device.owned == a {
                device.book.add_contact(b);
            } else if device.owned == b {
                device.book.add_contact(a);
            }
        }
    }

    /// Overwrite how every device of `owned` sees `contact`.
    pub fn force_status(&mut self, owned: Identity, contact: Identity, one_to_one: bool) {
        for device in self.devices.iter().filter(|d| d.owned == owned) {
            device.book.set_one_to_one(contact, one_to_one);
        }
    }

    /// Delete `contact` from every device of `owned`.
    pub fn forget(&mut self, owned: Identity, contact: &Identity) {
        for device in self.devices.iter().filter(|d| d.owned == owned) {
            device.book.remove_contact(contact);
        }
    }

    /// Devices of `owned`, in creation order.
    pub fn devices_of(&self, owned: &Identity) -> Vec<DeviceId> {
        self.devices.iter().filter(|d| d.owned == *owned).map(|d| d.id).collect()
    }

    /// A device.
    pub fn device(&self, id: DeviceId) -> Result<&SimDevice, SimError> {
        self.devices.get(id.0).ok_or(SimError::UnknownDevice(id))
    }

    /// All devices.
    pub fn devices(&self) -> &[SimDevice] {
        &self.devices
    }

    /// Messages on the wire, oldest first.
    pub fn in_flight(&self) -> &VecDeque<InFlight> {
        &self.network
    }

    /// Every message delivered so far, in delivery order.
    pub fn delivered(&self) -> &[InFlight] {
        &self.delivered
    }

    /// Shared virtual clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Start a protocol run on `device`.
    pub fn start(&mut self, device: DeviceId, request: StartRequest) -> Result<(), SimError> {
        let owned = self.device(device)?.owned;
        self.dispatch(device, EngineEvent::Start { owned, request });
        Ok(())
    }

    /// The user on `device` answers a prompt it is showing.
    pub fn answer(
        &mut self,
        device: DeviceId,
        dialog_id: DialogId,
        value: bool,
    ) -> Result<(), SimError> {
        let shown = self
            .device(device)?
            .dialogs
            .get(&dialog_id)
            .cloned()
            .ok_or(SimError::UnknownDialog { device, dialog_id })?;
        self.answer_with(device, dialog_id, &shown, value)
    }

    /// Answer a prompt as it was once shown, even if it is gone by now.
    ///
    /// Models a user clicking a prompt that another device already settled.
    pub fn answer_with(
        &mut self,
        device: DeviceId,
        dialog_id: DialogId,
        shown: &ShownDialog,
        value: bool,
    ) -> Result<(), SimError> {
        let owned = self.device(device)?.owned;
        let response = Encoded::encode(&value).map_err(|e| SimError::Encode(e.to_string()))?;
        let envelope = MessageEnvelope::new(shown.protocol, shown.instance, shown.answer)
            .answering(DialogResponse { dialog_id, response })
            .received_on(ReceptionInfo::local());
        self.dispatch(device, EngineEvent::MessageReceived { owned, envelope });
        Ok(())
    }

    /// Rebuild the device's engine over its storage and replay waiting
    /// records.
    pub fn restart(&mut self, device: DeviceId) -> Result<(), SimError> {
        let (env, storage, book, channel) = {
            let d = self.device(device)?;
            (d.env.clone(), d.storage.clone(), d.book.clone(), d.channel.clone())
        };
        let driver = self.build_driver(&env, &storage, &book, &channel);
        self.devices[device.0].driver = driver;
        debug!(%device, "device restarted");
        self.dispatch(device, EngineEvent::Startup);
        Ok(())
    }

    /// Deliver the oldest in-flight message. `false` if none.
    pub fn deliver_next(&mut self) -> bool {
        match self.network.pop_front() {
            Some(message) => {
                self.deliver(message);
                true
            },
            None => false,
        }
    }

    /// Deliver the in-flight message at `index`, ahead of older ones.
    pub fn deliver_at(&mut self, index: usize) -> Result<(), SimError> {
        let message = self.network.remove(index).ok_or(SimError::NoSuchMessage(index))?;
        self.deliver(message);
        Ok(())
    }

    /// Deliver a message picked by the world's RNG. `false` if none.
    pub fn deliver_random(&mut self) -> bool {
        if self.network.is_empty() {
            return false;
        }
        let index = self.rng.gen_range(0..self.network.len());
        self.deliver_at(index).is_ok()
    }

    /// Put a copy of the in-flight message at `index` at the back.
    pub fn duplicate(&mut self, index: usize) -> Result<(), SimError> {
        let copy = self.network.get(index).cloned().ok_or(SimError::NoSuchMessage(index))?;
        self.network.push_back(copy);
        Ok(())
    }

    /// Lose the in-flight message at `index`.
    pub fn drop_at(&mut self, index: usize) -> Result<InFlight, SimError> {
        self.network.remove(index).ok_or(SimError::NoSuchMessage(index))
    }

    /// Deliver in order until the wire is empty. Returns the number of
    /// deliveries.
    pub fn deliver_all(&mut self) -> usize {
        self.deliver_until_quiet(Self::deliver_next)
    }

    /// Deliver in random order until the wire is empty.
    pub fn deliver_all_random(&mut self) -> usize {
        self.deliver_until_quiet(Self::deliver_random)
    }

    /// Put every message delivered so far back on the wire.
    pub fn replay_delivered(&mut self) {
        self.network.extend(self.delivered.iter().cloned());
    }

    /// Observable state of every device.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_devices(self.devices.iter().map(SimDevice::snapshot).collect())
    }

    /// Whether no device holds a row, a waiting record or a prompt.
    pub fn is_settled(&self) -> bool {
        self.network.is_empty()
            && self.snapshot().devices.iter().all(|d| {
                d.instances.is_empty() && d.waiting.is_empty() && d.dialogs.is_empty()
            })
    }

    fn deliver_until_quiet(&mut self, mut step: impl FnMut(&mut Self) -> bool) -> usize {
        let mut count = 0;
        while count < MAX_DELIVERIES && step(self) {
            count += 1;
        }
        if !self.network.is_empty() {
            error!(count, in_flight = self.network.len(), "delivery bound reached");
        }
        count
    }

    fn build_driver(
        &self,
        env: &SimEnv,
        storage: &MemoryStorage,
        book: &SimIdentityBook,
        channel: &SimChannel,
    ) -> EngineDriver<SimEnv, MemoryStorage> {
        #[allow(clippy::expect_used)]
        let delegates = Delegates::builder()
            .channel(channel.clone())
            .identity(book.clone())
            .starter(DefaultProtocolStarter)
            .build()
            .expect("invariant: every delegate is set");
        #[allow(clippy::expect_used)]
        let registry = one_to_one::registry(self.invitation)
            .expect("invariant: built-in protocol table is well-formed");
        EngineDriver::new(Engine::new(
            env.clone(),
            storage.clone(),
            registry,
            delegates,
            self.engine_config.clone(),
        ))
    }

    fn deliver(&mut self, message: InFlight) {
        self.env.advance(TICK);
        self.delivered.push(message.clone());
        let InFlight { to, owned, envelope } = message;
        self.dispatch(to, EngineEvent::MessageReceived { owned, envelope });
    }

    /// Process `event` and everything it feeds back locally.
    fn dispatch(&mut self, device: DeviceId, event: EngineEvent) {
        let mut local = VecDeque::from([event]);
        while let Some(event) = local.pop_front() {
            match self.devices[device.0].driver.process_event(event) {
                Ok(actions) => {
                    for action in actions {
                        self.apply(device, action, &mut local);
                    }
                },
                Err(err) => {
                    warn!(%device, %err, "event failed");
                    self.devices[device.0].errors.push(err.to_string());
                },
            }
        }

        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.snapshot(), &format!("after event on {device}"));
        }
    }

    fn apply(&mut self, device: DeviceId, action: EngineAction, local: &mut VecDeque<EngineEvent>) {
        match action {
            EngineAction::Deliver { owned, message, .. } => {
                self.route(device, owned, message, local);
            },
            EngineAction::ContactUpgraded { owned, contact } => {
                local.push_back(EngineEvent::ContactUpgraded { owned, contact });
            },
            EngineAction::InstanceFinished { key, terminal } => {
                debug!(%device, %key, %terminal, "instance finished");
                self.devices[device.0].finished.insert(key);
            },
        }
    }

    fn route(
        &mut self,
        from: DeviceId,
        owned: Identity,
        message: OutboundMessage,
        local: &mut VecDeque<EngineEvent>,
    ) {
        let OutboundMessage { channel, envelope } = message;
        match channel {
            SendChannel::Contacts(contacts) => {
                let reception = ReceptionInfo::from_contact(owned);
                for contact in contacts {
                    for to in self.devices_of(&contact) {
                        self.network.push_back(InFlight {
                            to,
                            owned: contact,
                            envelope: envelope.clone().received_on(reception),
                        });
                    }
                }
            },
            SendChannel::OwnedDevices => {
                let reception = ReceptionInfo::from_owned_device(owned);
                for to in self.devices_of(&owned).into_iter().filter(|to| *to != from) {
                    self.network.push_back(InFlight {
                        to,
                        owned,
                        envelope: envelope.clone().received_on(reception),
                    });
                }
            },
            SendChannel::UserInterface { dialog_id, content } => {
                let dialogs = &mut self.devices[from.0].dialogs;
                match content {
                    DialogContent::Show(dialog) => {
                        dialogs.insert(dialog_id, ShownDialog {
                            protocol: envelope.protocol,
                            instance: envelope.instance,
                            answer: envelope.kind,
                            dialog,
                        });
                    },
                    DialogContent::Delete => {
                        dialogs.remove(&dialog_id);
                    },
                }
            },
            SendChannel::Local => local.push_back(EngineEvent::MessageReceived {
                owned,
                envelope: envelope.received_on(ReceptionInfo::local()),
            }),
        }
    }
}
