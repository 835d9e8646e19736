#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use parley_core::{InstanceKey, WaitingRecord};
use parley_proto::{Identity, MessageKind};

use super::{ChangeSet, Storage, StorageError, StorageOp, StoredInstance, waiting_slot};

/// In-memory storage implementation for testing and simulation
///
/// Ordered maps keep listings deterministic. All state is wrapped in
/// Arc<Mutex<>> to allow Clone and concurrent access. Thread-safe through
/// Mutex, but uses `lock().expect()` which will panic if the mutex is
/// poisoned - acceptable for test code. A commit works on a copy of the maps
/// and swaps it in only when every op succeeded.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Clone, Default)]
struct MemoryStorageInner {
    /// Live instances
    instances: BTreeMap<InstanceKey, StoredInstance>,

    /// Waiting records, `(owned, remote, instance)` -> pending message
    waiting: BTreeMap<(Identity, Identity, InstanceKey), MessageKind>,

    /// Instances that reached a terminal state
    terminated: BTreeSet<InstanceKey>,
}

impl MemoryStorageInner {
    fn revision_of(&self, key: &InstanceKey) -> u64 {
        self.instances.get(key).map_or(0, |i| i.revision)
    }

    fn check_revision(&self, key: &InstanceKey, expected: u64) -> Result<u64, StorageError> {
        let got = self.revision_of(key);
        if got == expected { Ok(got) } else { Err(StorageError::Conflict { expected, got }) }
    }

    fn apply(&mut self, op: &StorageOp, committed_at_secs: u64) -> Result<(), StorageError> {
        match op {
            StorageOp::PutInstance { key, state, expected_revision } => {
                if self.terminated.contains(key) {
                    return Err(StorageError::Terminated(*key));
                }
                let current = self.check_revision(key, *expected_revision)?;
                self.instances.insert(
                    *key,
                    StoredInstance {
                        state: state.clone(),
                        revision: current + 1,
                        updated_at_secs: committed_at_secs,
                    },
                );
            },
            StorageOp::DeleteInstance { key, expected_revision } => {
                self.check_revision(key, *expected_revision)?;
                self.instances.remove(key);
                self.waiting.retain(|(_, _, instance), _| instance != key);
            },
            StorageOp::PutWaiting(record) => {
                self.waiting.insert(waiting_slot(record), record.pending);
            },
            StorageOp::DeleteWaiting(record) => {
                self.waiting.remove(&waiting_slot(record));
            },
            StorageOp::MarkTerminated { key } => {
                self.terminated.insert(*key);
            },
        }
        Ok(())
    }
}

fn to_record(slot: &(Identity, Identity, InstanceKey), pending: MessageKind) -> WaitingRecord {
    let (owned, remote, key) = *slot;
    WaitingRecord { owned, remote, protocol: key.protocol, instance: key.instance, pending }
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Number of live instances.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn instance_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").instances.len()
    }

    /// Number of waiting records.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").waiting.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn load_instance(&self, key: &InstanceKey) -> Result<Option<StoredInstance>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.instances.get(key).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn list_instances(&self) -> Result<Vec<(InstanceKey, StoredInstance)>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.instances.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn waiting_for(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner
            .waiting
            .iter()
            .filter(|((o, r, _), _)| o == owned && r == remote)
            .map(|(slot, pending)| to_record(slot, *pending))
            .collect())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn list_waiting(&self) -> Result<Vec<WaitingRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.waiting.iter().map(|(slot, pending)| to_record(slot, *pending)).collect())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn is_terminated(&self, key: &InstanceKey) -> Result<bool, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.terminated.contains(key))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let mut next = inner.clone();
        for op in &changes.ops {
            next.apply(op, changes.committed_at_secs)?;
        }
        *inner = next;

        Ok(())
    }
}
