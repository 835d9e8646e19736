//! Deterministic simulation harness for parley protocols.
//!
//! Seeded implementations of the engine's environment and delegates, and a
//! [`SimWorld`] that runs several devices of several identities against each
//! other with full control over message order, duplication and loss.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold after every
//! event regardless of delivery order: no waiting record outlives its
//! instance, no terminal state is persisted, no prompt outlives its
//! instance. Use [`InvariantRegistry::standard()`] with
//! [`SimWorld::with_invariants`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_channel;
pub mod sim_env;
pub mod sim_identity;
pub mod world;

pub use invariants::{
    DeviceSnapshot, DialogsMatchInstances, InstanceSnapshot, Invariant, InvariantRegistry,
    InvariantResult, NoDanglingWaitingRecords, NoEngineErrors, NoTerminalRows, SystemSnapshot,
    Violation,
};
pub use sim_channel::SimChannel;
pub use sim_env::{SIM_EPOCH_SECS, SimEnv};
pub use sim_identity::SimIdentityBook;
pub use world::{DeviceId, InFlight, MAX_DELIVERIES, ShownDialog, SimDevice, SimError, SimWorld};
