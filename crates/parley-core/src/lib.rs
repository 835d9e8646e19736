//! Protocol framework for parley
//!
//! Hosted protocols are written as closed sets of messages, states and steps.
//! This crate defines those abstractions, the contracts of the engine's
//! external collaborators, and the one-to-one contact invitation protocol
//! built on top of them. It performs no I/O: storage, transactions and the
//! event loop live in `parley-engine`.
//!
//! # Components
//!
//! - [`Protocol`], [`ProtocolMessage`], [`ProtocolState`]: typed protocol
//!   definitions
//! - [`StepTable`]: per-protocol `(state, message)` step lookup
//! - [`ProtocolRegistry`]: type-erased dispatch over every hosted protocol
//! - [`StepContext`]: what a step may touch during its transaction
//! - [`Delegates`]: channel, identity and protocol-starter collaborators
//! - [`one_to_one`]: the one-to-one contact invitation protocol
//!
//! # Step contract
//!
//! A step is a pure function of `(state, message)` plus what it reads
//! through its [`StepContext`]. It returns the next state; returning the
//! start state unchanged means the message was ignored. Any error rolls the
//! whole step back.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod delegate;
pub mod env;
pub mod error;
pub mod ledger;
pub mod one_to_one;
pub mod protocol;
pub mod registry;
pub mod starter;

pub use context::{Posted, StepContext, StepEffects};
pub use delegate::{
    ChannelDelegate, Delegates, DelegatesBuilder, DeliveryHandle, IdentityDelegate,
    ProtocolStarterDelegate, StartRequest, StatusChange,
};
pub use env::{Environment, Prng};
pub use error::{ChannelError, IdentityError, LedgerError, RegistryError, StepError};
pub use ledger::{InstanceKey, WaitingInstance, WaitingLedger, WaitingRecord};
pub use protocol::{Protocol, ProtocolMessage, ProtocolState, StepDescriptor, StepFn, StepTable};
pub use registry::{
    DropReason, HostedProtocol, ProtocolRegistry, RunError, StepRun, StepSummary, StoredState,
};
pub use starter::DefaultProtocolStarter;
