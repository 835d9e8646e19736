//! Observable state snapshots for invariant checking.
//!
//! Invariants run against snapshots rather than live engines so a check sees
//! every device at the same point of the simulation.

use std::collections::BTreeMap;

use parley_core::{InstanceKey, WaitingRecord};
use parley_proto::{DialogId, Identity, StateKind};

use crate::world::{DeviceId, ShownDialog};

/// Snapshot of every simulated device.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-device state.
    pub devices: Vec<DeviceSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot with no devices.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of the given devices.
    pub fn from_devices(devices: Vec<DeviceSnapshot>) -> Self {
        Self { devices }
    }
}

/// Snapshot of one device.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    /// Device identifier.
    pub id: DeviceId,
    /// Identity the device belongs to.
    pub owned: Identity,
    /// Live instance rows.
    pub instances: Vec<InstanceSnapshot>,
    /// Waiting records.
    pub waiting: Vec<WaitingRecord>,
    /// Prompts currently on screen.
    pub dialogs: BTreeMap<DialogId, ShownDialog>,
    /// Contact book: contact -> one-to-one.
    pub contacts: BTreeMap<Identity, bool>,
    /// Engine errors seen so far.
    pub errors: Vec<String>,
}

impl DeviceSnapshot {
    /// Snapshot of an idle device.
    pub fn new(id: DeviceId, owned: Identity) -> Self {
        Self {
            id,
            owned,
            instances: Vec::new(),
            waiting: Vec::new(),
            dialogs: BTreeMap::new(),
            contacts: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Whether `key` has a row on this device.
    pub fn has_instance(&self, key: &InstanceKey) -> bool {
        self.instances.iter().any(|i| i.key == *key)
    }
}

/// One stored instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSnapshot {
    /// Instance key.
    pub key: InstanceKey,
    /// Stored state kind.
    pub state: StateKind,
    /// Row revision.
    pub revision: u64,
    /// Whether the protocol declares `state` terminal.
    pub terminal: bool,
}
