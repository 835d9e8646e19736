//! Waiting-ledger view of one step transaction.
//!
//! Parked records are buffered here and become storage ops only if the step
//! succeeds. Queries see committed records plus the ones parked so far.

use parley_core::{InstanceKey, LedgerError, WaitingInstance, WaitingLedger, WaitingRecord};
use parley_proto::{Identity, StateKind};

use crate::storage::{Storage, waiting_slot};

pub(crate) struct Transaction<'s, S: Storage> {
    storage: &'s S,
    key: InstanceKey,
    /// State the running instance was loaded in
    current: StateKind,
    parked: Vec<WaitingRecord>,
}

impl<'s, S: Storage> Transaction<'s, S> {
    pub(crate) fn new(storage: &'s S, key: InstanceKey, current: StateKind) -> Self {
        Self { storage, key, current, parked: Vec::new() }
    }

    /// Records parked by the step, in park order.
    pub(crate) fn into_parked(self) -> Vec<WaitingRecord> {
        self.parked
    }

    fn state_of(&self, key: &InstanceKey) -> Result<Option<StateKind>, LedgerError> {
        if *key == self.key {
            return Ok(Some(self.current));
        }
        Ok(self.storage.load_instance(key)?.map(|stored| stored.state.kind))
    }
}

impl<S: Storage> WaitingLedger for Transaction<'_, S> {
    fn park(&mut self, record: WaitingRecord) -> Result<(), LedgerError> {
        if record.instance_key() != self.key {
            return Err(LedgerError::Unavailable(format!(
                "instance {} cannot park on behalf of {}",
                self.key,
                record.instance_key()
            )));
        }
        self.parked.retain(|r| waiting_slot(r) != waiting_slot(&record));
        self.parked.push(record);
        Ok(())
    }

    fn query(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingInstance>, LedgerError> {
        let mut records = self.storage.waiting_for(owned, remote)?;
        for record in self.parked.iter().filter(|r| r.owned == *owned && r.remote == *remote) {
            records.retain(|r| waiting_slot(r) != waiting_slot(record));
            records.push(*record);
        }

        let mut found = Vec::with_capacity(records.len());
        for record in records {
            found.push(WaitingInstance { record, state: self.state_of(&record.instance_key())? });
        }
        Ok(found)
    }
}
