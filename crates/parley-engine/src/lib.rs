//! Parley protocol execution engine.
//!
//! Durable storage and transactional execution for the protocols defined in
//! [`parley_core`].
//!
//! # Architecture
//!
//! The [`Engine`] runs one inbound message as one transaction: load the
//! instance, run the unique matching step, commit the next state together
//! with any waiting records, then release deliveries and identity changes.
//! The [`EngineDriver`] follows the Sans-IO pattern on top of it: events in,
//! actions out, with follow-up work (local loop-backs, waiting-record
//! resolution) drained inline under a budget.
//!
//! # Components
//!
//! - [`Engine`]: transactional executor and waiting-ledger resolution
//! - [`EngineDriver`]: action-based orchestrator (pure logic, no I/O)
//! - [`storage`]: `Storage` trait with in-memory, Redb and chaos backends
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod engine;
mod error;
pub mod storage;
mod system_env;
mod transaction;

pub use config::EngineConfig;
pub use driver::{EngineAction, EngineDriver, EngineEvent};
pub use engine::{Engine, Execution, InstanceView, Outcome, Started};
pub use error::EngineError;
pub use storage::{
    ChangeSet, ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError, StorageOp,
    StoredInstance,
};
pub use system_env::SystemEnv;
