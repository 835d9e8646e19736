//! Storage abstraction for protocol instances and waiting records
//!
//! Trait-based abstraction for persisting instance states and the waiting
//! ledger. The trait is synchronous (no async) to keep step execution a plain
//! function call. Reads are individual; writes only happen through
//! [`Storage::commit`], which applies a whole [`ChangeSet`] or nothing.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use parley_core::{InstanceKey, StoredState, WaitingRecord};
use parley_proto::Identity;
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// A persisted live instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInstance {
    /// Current state
    pub state: StoredState,
    /// Bumped on every write; the first stored revision is 1
    pub revision: u64,
    /// Unix timestamp (seconds) of the last write
    pub updated_at_secs: u64,
}

/// One write in a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Insert or replace an instance row.
    PutInstance {
        /// Instance to write
        key: InstanceKey,
        /// New state
        state: StoredState,
        /// Revision the state was computed from (0 when the row was absent)
        expected_revision: u64,
    },
    /// Delete an instance row and every waiting record pointing at it.
    DeleteInstance {
        /// Instance to delete
        key: InstanceKey,
        /// Revision the deletion was decided at
        expected_revision: u64,
    },
    /// Insert a waiting record, replacing one for the same instance and
    /// remote identity.
    PutWaiting(WaitingRecord),
    /// Delete a waiting record; absent records are ignored.
    DeleteWaiting(WaitingRecord),
    /// Record that an instance reached a terminal state. Later
    /// `PutInstance` ops on the key are rejected.
    MarkTerminated {
        /// Finished instance
        key: InstanceKey,
    },
}

/// Writes applied atomically, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Writes, applied in order
    pub ops: Vec<StorageOp>,
    /// Unix timestamp (seconds) stamped on written instances
    pub committed_at_secs: u64,
}

impl ChangeSet {
    /// Empty change set stamped `committed_at_secs`.
    pub fn new(committed_at_secs: u64) -> Self {
        Self { ops: Vec::new(), committed_at_secs }
    }

    /// Append a write.
    pub fn push(&mut self, op: StorageOp) {
        self.ops.push(op);
    }

    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Storage abstraction for instances and waiting records
///
/// Must be Clone (shared by the engine and inspection tools), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations
/// typically share internal state via Arc, so clones access the same
/// underlying storage.
///
/// # Invariants
///
/// - A waiting record exists only while its instance row exists
/// - Instance revisions strictly increase while the row exists
/// - A terminated key never gets a row again
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation code, but production implementations should handle poisoned
/// mutexes gracefully.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Load a live instance. `None` if the row is absent.
    fn load_instance(&self, key: &InstanceKey) -> Result<Option<StoredInstance>, StorageError>;

    /// Every live instance, ordered by key.
    fn list_instances(&self) -> Result<Vec<(InstanceKey, StoredInstance)>, StorageError>;

    /// Waiting records of `owned` about `remote`.
    fn waiting_for(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingRecord>, StorageError>;

    /// Every waiting record.
    fn list_waiting(&self) -> Result<Vec<WaitingRecord>, StorageError>;

    /// Whether `key` reached a terminal state.
    fn is_terminated(&self, key: &InstanceKey) -> Result<bool, StorageError>;

    /// Apply `changes` atomically.
    ///
    /// # Errors
    ///
    /// `StorageError::Conflict` when an instance op's expected revision does
    /// not match the stored one, `StorageError::Terminated` when a put
    /// targets a terminated key. Nothing is written on any error.
    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError>;
}

/// Key of the waiting row `record` occupies.
pub(crate) fn waiting_slot(record: &WaitingRecord) -> (Identity, Identity, InstanceKey) {
    (record.owned, record.remote, record.instance_key())
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every backend must share.

    use parley_core::StoredState;
    use parley_proto::{InstanceId, MessageKind, ProtocolId, StateKind};

    use super::*;

    pub fn key(byte: u8) -> InstanceKey {
        InstanceKey {
            protocol: ProtocolId(15),
            instance: InstanceId::from_bytes([byte; 32]),
            owned: Identity::from_bytes([1; 32]),
        }
    }

    pub fn state(kind: u16) -> StoredState {
        StoredState { kind: StateKind(kind), blob: vec![kind as u8; 4] }
    }

    pub fn record(key: InstanceKey, remote: u8) -> WaitingRecord {
        WaitingRecord {
            owned: key.owned,
            remote: Identity::from_bytes([remote; 32]),
            protocol: key.protocol,
            instance: key.instance,
            pending: MessageKind(8),
        }
    }

    fn put(key: InstanceKey, kind: u16, expected_revision: u64) -> StorageOp {
        StorageOp::PutInstance { key, state: state(kind), expected_revision }
    }

    fn commit<S: Storage>(storage: &S, ops: Vec<StorageOp>) -> Result<(), StorageError> {
        storage.commit(&ChangeSet { ops, committed_at_secs: 1_700_000_000 })
    }

    pub fn revisions_start_at_one_and_increase<S: Storage>(storage: &S) {
        let k = key(1);
        commit(storage, vec![put(k, 1, 0)]).unwrap();
        let stored = storage.load_instance(&k).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.state, state(1));
        assert_eq!(stored.updated_at_secs, 1_700_000_000);

        commit(storage, vec![put(k, 2, 1)]).unwrap();
        assert_eq!(storage.load_instance(&k).unwrap().unwrap().revision, 2);
    }

    pub fn stale_revision_is_rejected_atomically<S: Storage>(storage: &S) {
        let (a, b) = (key(1), key(2));
        commit(storage, vec![put(a, 1, 0)]).unwrap();

        let result = commit(storage, vec![put(b, 1, 0), put(a, 2, 0)]);
        assert_eq!(result, Err(StorageError::Conflict { expected: 0, got: 1 }));
        assert_eq!(storage.load_instance(&b).unwrap(), None, "partial write leaked");
        assert_eq!(storage.load_instance(&a).unwrap().unwrap().state, state(1));
    }

    pub fn delete_cascades_to_waiting_records<S: Storage>(storage: &S) {
        let (a, b) = (key(1), key(2));
        commit(
            storage,
            vec![
                StorageOp::PutWaiting(record(a, 7)),
                StorageOp::PutWaiting(record(a, 8)),
                StorageOp::PutWaiting(record(b, 7)),
                put(a, 1, 0),
                put(b, 1, 0),
            ],
        )
        .unwrap();
        assert_eq!(storage.list_waiting().unwrap().len(), 3);

        commit(storage, vec![StorageOp::DeleteInstance { key: a, expected_revision: 1 }]).unwrap();

        assert_eq!(storage.load_instance(&a).unwrap(), None);
        assert_eq!(storage.list_waiting().unwrap(), vec![record(b, 7)]);
    }

    pub fn waiting_queries_filter_by_pair<S: Storage>(storage: &S) {
        let (a, b) = (key(1), key(2));
        commit(
            storage,
            vec![
                put(a, 1, 0),
                put(b, 1, 0),
                StorageOp::PutWaiting(record(a, 7)),
                StorageOp::PutWaiting(record(b, 7)),
                StorageOp::PutWaiting(record(b, 9)),
            ],
        )
        .unwrap();

        let owned = a.owned;
        let found = storage.waiting_for(&owned, &Identity::from_bytes([7; 32])).unwrap();
        assert_eq!(found.len(), 2);
        assert!(storage.waiting_for(&owned, &Identity::from_bytes([3; 32])).unwrap().is_empty());

        commit(storage, vec![StorageOp::DeleteWaiting(record(b, 7))]).unwrap();
        let found = storage.waiting_for(&owned, &Identity::from_bytes([7; 32])).unwrap();
        assert_eq!(found, vec![record(a, 7)]);
    }

    pub fn deleting_absent_rows<S: Storage>(storage: &S) {
        // Absent waiting rows are ignored; absent instances have revision 0.
        commit(storage, vec![StorageOp::DeleteWaiting(record(key(1), 7))]).unwrap();
        assert_eq!(
            commit(storage, vec![StorageOp::DeleteInstance { key: key(1), expected_revision: 1 }]),
            Err(StorageError::Conflict { expected: 1, got: 0 })
        );
    }

    pub fn terminated_keys_refuse_new_rows<S: Storage>(storage: &S) {
        let (a, b) = (key(1), key(2));
        commit(storage, vec![put(a, 1, 0), StorageOp::PutWaiting(record(a, 7))]).unwrap();
        assert!(!storage.is_terminated(&a).unwrap());

        commit(
            storage,
            vec![
                StorageOp::DeleteInstance { key: a, expected_revision: 1 },
                StorageOp::MarkTerminated { key: a },
            ],
        )
        .unwrap();
        assert!(storage.is_terminated(&a).unwrap());
        assert!(!storage.is_terminated(&b).unwrap());
        assert!(storage.list_waiting().unwrap().is_empty());

        // Marking twice is harmless; a put after the mark rolls back the batch.
        commit(storage, vec![StorageOp::MarkTerminated { key: a }]).unwrap();
        assert_eq!(
            commit(storage, vec![put(b, 1, 0), put(a, 1, 0)]),
            Err(StorageError::Terminated(a))
        );
        assert_eq!(storage.load_instance(&a).unwrap(), None);
        assert_eq!(storage.load_instance(&b).unwrap(), None);
    }

    pub fn list_instances_is_ordered<S: Storage>(storage: &S) {
        commit(storage, vec![put(key(3), 1, 0), put(key(1), 1, 0), put(key(2), 2, 0)]).unwrap();
        let keys: Vec<_> = storage.list_instances().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![key(1), key(2), key(3)]);
    }
}
