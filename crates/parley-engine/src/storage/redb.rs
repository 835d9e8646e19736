//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! [`ChangeSet`] is applied inside one write transaction, so an interrupted
//! commit leaves no trace.

use std::{path::Path, sync::Arc};

use parley_core::{InstanceKey, WaitingRecord};
use parley_proto::{Identity, InstanceId, MessageKind, ProtocolId};
use redb::{Database, ReadableTable, Table, TableDefinition};

use super::{ChangeSet, Storage, StorageError, StorageOp, StoredInstance};

/// Table: instances
/// Key: [protocol: 2 bytes BE][instance: 32 bytes][owned: 32 bytes]
/// Value: CBOR-encoded StoredInstance
const INSTANCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("instances");

/// Table: waiting
/// Key: [owned: 32 bytes][remote: 32 bytes][protocol: 2 bytes BE][instance: 32 bytes]
/// Value: pending message kind (2 bytes BE)
const WAITING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("waiting");

/// Table: terminated
/// Key: instance key, same layout as INSTANCES
/// Value: commit timestamp of the mark (8 bytes BE)
const TERMINATED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("terminated");

const ID_LEN: usize = Identity::LEN;
const INSTANCE_KEY_LEN: usize = 2 + 2 * ID_LEN;
const WAITING_KEY_LEN: usize = 2 + 3 * ID_LEN;

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (INSTANCES, WAITING, TERMINATED).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(WAITING).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(TERMINATED).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

type RawTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

fn stored_revision(table: &RawTable<'_>, key: &[u8]) -> Result<u64, StorageError> {
    match table.get(key).map_err(|e| StorageError::Io(e.to_string()))? {
        Some(value) => Ok(decode_instance(value.value())?.revision),
        None => Ok(0),
    }
}

fn check_revision(table: &RawTable<'_>, key: &[u8], expected: u64) -> Result<u64, StorageError> {
    let got = stored_revision(table, key)?;
    if got == expected { Ok(got) } else { Err(StorageError::Conflict { expected, got }) }
}

/// Remove every waiting row that points at `key`.
fn cascade_waiting(waiting: &mut RawTable<'_>, key: &InstanceKey) -> Result<(), StorageError> {
    let mut start = [0u8; WAITING_KEY_LEN];
    let mut end = [0xFFu8; WAITING_KEY_LEN];
    start[..ID_LEN].copy_from_slice(key.owned.as_bytes());
    end[..ID_LEN].copy_from_slice(key.owned.as_bytes());

    let mut doomed = Vec::new();
    for result in waiting
        .range(start.as_slice()..=end.as_slice())
        .map_err(|e| StorageError::Io(e.to_string()))?
    {
        let (row, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
        let bytes = row.value();
        if bytes[2 * ID_LEN..] == encode_instance_suffix(key) {
            doomed.push(bytes.to_vec());
        }
    }

    for row in doomed {
        waiting.remove(row.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
    }
    Ok(())
}

/// Tables one commit writes to.
struct Tables<'txn> {
    instances: RawTable<'txn>,
    waiting: RawTable<'txn>,
    terminated: RawTable<'txn>,
}

fn apply(
    tables: &mut Tables<'_>,
    op: &StorageOp,
    committed_at_secs: u64,
) -> Result<(), StorageError> {
    let Tables { instances, waiting, terminated } = tables;
    match op {
        StorageOp::PutInstance { key, state, expected_revision } => {
            let row = encode_instance_key(key);
            let spent = terminated
                .get(row.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .is_some();
            if spent {
                return Err(StorageError::Terminated(*key));
            }
            let current = check_revision(instances, &row, *expected_revision)?;

            let stored = StoredInstance {
                state: state.clone(),
                revision: current + 1,
                updated_at_secs: committed_at_secs,
            };
            let mut bytes = Vec::new();
            ciborium::into_writer(&stored, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            instances
                .insert(row.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        },
        StorageOp::DeleteInstance { key, expected_revision } => {
            let row = encode_instance_key(key);
            check_revision(instances, &row, *expected_revision)?;

            instances.remove(row.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            cascade_waiting(waiting, key)?;
        },
        StorageOp::PutWaiting(record) => {
            let row = encode_waiting_key(record);
            waiting
                .insert(row.as_slice(), record.pending.0.to_be_bytes().as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        },
        StorageOp::DeleteWaiting(record) => {
            let row = encode_waiting_key(record);
            waiting.remove(row.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
        },
        StorageOp::MarkTerminated { key } => {
            let row = encode_instance_key(key);
            terminated
                .insert(row.as_slice(), committed_at_secs.to_be_bytes().as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        },
    }
    Ok(())
}

impl Storage for RedbStorage {
    fn load_instance(&self, key: &InstanceKey) -> Result<Option<StoredInstance>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let table = txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;

        let row = encode_instance_key(key);

        match table.get(row.as_slice()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => Ok(Some(decode_instance(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_instances(&self) -> Result<Vec<(InstanceKey, StoredInstance)>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let table = txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut instances = Vec::new();

        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            instances.push((decode_instance_key(key.value())?, decode_instance(value.value())?));
        }

        Ok(instances)
    }

    fn waiting_for(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let table = txn.open_table(WAITING).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut start = [0u8; WAITING_KEY_LEN];
        let mut end = [0xFFu8; WAITING_KEY_LEN];
        for bound in [&mut start, &mut end] {
            bound[..ID_LEN].copy_from_slice(owned.as_bytes());
            bound[ID_LEN..2 * ID_LEN].copy_from_slice(remote.as_bytes());
        }

        let results = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut records = Vec::new();
        for result in results {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            records.push(decode_waiting(key.value(), value.value())?);
        }

        Ok(records)
    }

    fn list_waiting(&self) -> Result<Vec<WaitingRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let table = txn.open_table(WAITING).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut records = Vec::new();

        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            records.push(decode_waiting(key.value(), value.value())?);
        }

        Ok(records)
    }

    fn is_terminated(&self, key: &InstanceKey) -> Result<bool, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let table = txn.open_table(TERMINATED).map_err(|e| StorageError::Io(e.to_string()))?;

        let row = encode_instance_key(key);

        Ok(table.get(row.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?.is_some())
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        // An early return drops `txn` uncommitted, which aborts it.
        {
            let mut tables = Tables {
                instances: txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?,
                waiting: txn.open_table(WAITING).map_err(|e| StorageError::Io(e.to_string()))?,
                terminated: txn
                    .open_table(TERMINATED)
                    .map_err(|e| StorageError::Io(e.to_string()))?,
            };

            for op in &changes.ops {
                apply(&mut tables, op, changes.committed_at_secs)?;
            }
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }
}

/// Encode an instance key as a 66-byte key.
///
/// Layout: [protocol: 2 bytes BE][instance: 32 bytes][owned: 32 bytes]
/// Lexicographic ordering matches `InstanceKey`'s ordering.
fn encode_instance_key(key: &InstanceKey) -> [u8; INSTANCE_KEY_LEN] {
    let mut bytes = [0u8; INSTANCE_KEY_LEN];
    bytes[..2].copy_from_slice(&key.protocol.0.to_be_bytes());
    bytes[2..2 + ID_LEN].copy_from_slice(key.instance.as_bytes());
    bytes[2 + ID_LEN..].copy_from_slice(key.owned.as_bytes());
    bytes
}

fn decode_instance_key(bytes: &[u8]) -> Result<InstanceKey, StorageError> {
    if bytes.len() != INSTANCE_KEY_LEN {
        return Err(StorageError::Serialization(format!(
            "instance key has {} bytes, expected {INSTANCE_KEY_LEN}",
            bytes.len()
        )));
    }
    Ok(InstanceKey {
        protocol: ProtocolId(u16::from_be_bytes([bytes[0], bytes[1]])),
        instance: InstanceId::from_bytes(array_at(bytes, 2)?),
        owned: Identity::from_bytes(array_at(bytes, 2 + ID_LEN)?),
    })
}

/// Protocol and instance of `key`, the tail of its waiting rows.
fn encode_instance_suffix(key: &InstanceKey) -> [u8; 2 + ID_LEN] {
    let mut bytes = [0u8; 2 + ID_LEN];
    bytes[..2].copy_from_slice(&key.protocol.0.to_be_bytes());
    bytes[2..].copy_from_slice(key.instance.as_bytes());
    bytes
}

/// Encode a waiting record's slot as a 98-byte key.
///
/// Layout: [owned: 32 bytes][remote: 32 bytes][protocol: 2 bytes BE][instance: 32 bytes]
/// Grouping by `(owned, remote)` first makes `waiting_for` a range scan.
fn encode_waiting_key(record: &WaitingRecord) -> [u8; WAITING_KEY_LEN] {
    let mut bytes = [0u8; WAITING_KEY_LEN];
    bytes[..ID_LEN].copy_from_slice(record.owned.as_bytes());
    bytes[ID_LEN..2 * ID_LEN].copy_from_slice(record.remote.as_bytes());
    bytes[2 * ID_LEN..].copy_from_slice(&encode_instance_suffix(&record.instance_key()));
    bytes
}

fn decode_waiting(key: &[u8], value: &[u8]) -> Result<WaitingRecord, StorageError> {
    if key.len() != WAITING_KEY_LEN {
        return Err(StorageError::Serialization(format!(
            "waiting key has {} bytes, expected {WAITING_KEY_LEN}",
            key.len()
        )));
    }
    let [hi, lo] = value else {
        return Err(StorageError::Serialization("waiting value is not 2 bytes".to_string()));
    };
    Ok(WaitingRecord {
        owned: Identity::from_bytes(array_at(key, 0)?),
        remote: Identity::from_bytes(array_at(key, ID_LEN)?),
        protocol: ProtocolId(u16::from_be_bytes([key[2 * ID_LEN], key[2 * ID_LEN + 1]])),
        instance: InstanceId::from_bytes(array_at(key, 2 * ID_LEN + 2)?),
        pending: MessageKind(u16::from_be_bytes([*hi, *lo])),
    })
}

fn decode_instance(bytes: &[u8]) -> Result<StoredInstance, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn array_at(bytes: &[u8], offset: usize) -> Result<[u8; ID_LEN], StorageError> {
    bytes
        .get(offset..offset + ID_LEN)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| StorageError::Serialization(format!("truncated key at offset {offset}")))
}
