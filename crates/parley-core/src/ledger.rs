//! Instance keys and the waiting-instance ledger contract.
//!
//! A waiting record parks a live instance on a precondition about a remote
//! identity ("tell me when this contact becomes one-to-one"). When the
//! precondition becomes true the engine replays `pending` as a local message
//! to the instance and deletes the record. Records never outlive their
//! instance: deleting an instance deletes its records in the same commit.

use std::fmt;

use parley_proto::{Identity, InstanceId, MessageKind, ProtocolId, StateKind};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Primary key of a protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Hosted protocol
    pub protocol: ProtocolId,
    /// Protocol run
    pub instance: InstanceId,
    /// Identity running it
    pub owned: Identity,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.protocol, self.instance, self.owned)
    }
}

/// A parked replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WaitingRecord {
    /// Identity owning the parked instance
    pub owned: Identity,
    /// Identity the precondition is about
    pub remote: Identity,
    /// Protocol of the parked instance
    pub protocol: ProtocolId,
    /// Parked instance
    pub instance: InstanceId,
    /// Message to replay once the precondition holds
    pub pending: MessageKind,
}

impl WaitingRecord {
    /// Key of the parked instance.
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey { protocol: self.protocol, instance: self.instance, owned: self.owned }
    }
}

/// A waiting record joined with the current state of its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingInstance {
    /// The record
    pub record: WaitingRecord,
    /// Current state of the referenced instance; `None` if it no longer
    /// exists
    pub state: Option<StateKind>,
}

/// Ledger access from inside a step's transaction.
pub trait WaitingLedger {
    /// Park `record`; it becomes durable when the transaction commits.
    fn park(&mut self, record: WaitingRecord) -> Result<(), LedgerError>;

    /// Records parked by `owned` about `remote`, including those parked
    /// earlier in this transaction.
    fn query(
        &self,
        owned: &Identity,
        remote: &Identity,
    ) -> Result<Vec<WaitingInstance>, LedgerError>;
}
