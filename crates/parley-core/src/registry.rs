//! Protocol registry and type-erased step dispatch.
//!
//! The registry maps a [`ProtocolId`] to a [`HostedProtocol`], the
//! object-safe face of a typed [`Protocol`]. Through it the engine decodes
//! inbound messages and stored states, finds the unique step for the loaded
//! `(state, message)` pair and runs it, without knowing any concrete message
//! or state type.

use std::{collections::BTreeMap, fmt};

use parley_proto::{
    ChannelKind, DecodeError, EncodeError, MessageEnvelope, MessageKind, ProtocolId, StateKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    context::StepContext,
    error::{RegistryError, StepError},
    protocol::{Protocol, ProtocolMessage, ProtocolState, StepTable},
};

/// Persisted form of a protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    /// State tag
    pub kind: StateKind,
    /// Encoded state fields
    pub blob: Vec<u8>,
}

/// Why a message was dropped without running a step.
///
/// Every reason is expected under duplication and reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No step starts from this state on this message.
    NoMatchingStep {
        /// Loaded state
        state: StateKind,
        /// Decoded message
        message: MessageKind,
    },
    /// A step matched but the message arrived on the wrong channel.
    UnexpectedChannel {
        /// Matched step
        step: &'static str,
        /// Channel the step accepts
        expected: ChannelKind,
        /// Channel the message arrived on
        got: Option<ChannelKind>,
    },
    /// The instance already reached a terminal state.
    Terminated,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingStep { state, message } => {
                write!(f, "no step for ({state}, {message})")
            },
            Self::UnexpectedChannel { step, expected, got: Some(got) } => {
                write!(f, "{step} expects {expected} channel, got {got}")
            },
            Self::UnexpectedChannel { step, expected, got: None } => {
                write!(f, "{step} expects {expected} channel, got no reception info")
            },
            Self::Terminated => f.write_str("instance already terminated"),
        }
    }
}

/// What running one inbound message did to an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRun {
    /// No step ran.
    Dropped(DropReason),
    /// The step ran and kept the start state.
    Unchanged {
        /// Step that ran
        step: &'static str,
        /// Unchanged state
        state: StateKind,
    },
    /// The step moved to a non-terminal state.
    Advanced {
        /// Step that ran
        step: &'static str,
        /// Start state
        from: StateKind,
        /// Next state, ready to persist
        to: StoredState,
    },
    /// The step moved to a terminal state.
    Finished {
        /// Step that ran
        step: &'static str,
        /// Start state
        from: StateKind,
        /// Terminal state reached
        terminal: StateKind,
    },
}

/// Failure while running a message through a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Message or stored state could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The step failed; the transaction must roll back.
    #[error("step error: {0}")]
    Step(#[from] StepError),
}

/// Static description of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSummary {
    /// Step name
    pub name: &'static str,
    /// Start state
    pub from: StateKind,
    /// Consumed message
    pub on: MessageKind,
    /// Accepted reception channel
    pub channel: ChannelKind,
}

/// Object-safe view of a registered protocol.
pub trait HostedProtocol: Send + Sync {
    /// Protocol tag.
    fn id(&self) -> ProtocolId;

    /// Protocol name.
    fn name(&self) -> &'static str;

    /// Exhaustive list of steps.
    fn steps(&self) -> Vec<StepSummary>;

    /// Whether `kind` names a terminal state; `None` if the tag is unknown.
    fn is_terminal(&self, kind: StateKind) -> Option<bool>;

    /// Whether a `kind` message still runs once its instance terminated.
    fn runs_after_termination(&self, kind: MessageKind) -> bool;

    /// Decode `stored` and render it for humans.
    fn describe_state(&self, stored: &StoredState) -> Result<String, DecodeError>;

    /// Persisted form of the initial state.
    fn initial_state(&self) -> Result<StoredState, EncodeError>;

    /// Decode `envelope`, load `stored` (or the initial state), and run the
    /// matching step.
    fn run(
        &self,
        stored: Option<&StoredState>,
        envelope: &MessageEnvelope,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepRun, RunError>;
}

struct Hosted<P: Protocol> {
    protocol: P,
    table: StepTable<P>,
}

impl<P: Protocol> HostedProtocol for Hosted<P> {
    fn id(&self) -> ProtocolId {
        P::ID
    }

    fn name(&self) -> &'static str {
        P::NAME
    }

    fn steps(&self) -> Vec<StepSummary> {
        let mut steps: Vec<_> = self
            .table
            .iter()
            .map(|d| StepSummary { name: d.name, from: d.from, on: d.on, channel: d.channel })
            .collect();
        steps.sort_by_key(|s| (s.from, s.on));
        steps
    }

    fn is_terminal(&self, kind: StateKind) -> Option<bool> {
        if P::TERMINAL.contains(&kind) {
            return Some(true);
        }
        let known = kind == StateKind::INITIAL || self.table.iter().any(|d| d.from == kind);
        known.then_some(false)
    }

    fn runs_after_termination(&self, kind: MessageKind) -> bool {
        P::LATE_MESSAGES.contains(&kind)
    }

    fn describe_state(&self, stored: &StoredState) -> Result<String, DecodeError> {
        let state = P::State::decode(stored.kind, &stored.blob)?;
        Ok(format!("{state:?}"))
    }

    fn initial_state(&self) -> Result<StoredState, EncodeError> {
        let state = P::State::initial();
        Ok(StoredState { kind: state.kind(), blob: state.encode()? })
    }

    fn run(
        &self,
        stored: Option<&StoredState>,
        envelope: &MessageEnvelope,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepRun, RunError> {
        let message = P::Message::decode(envelope)?;
        let state = match stored {
            Some(stored) => P::State::decode(stored.kind, &stored.blob)?,
            None => P::State::initial(),
        };

        let from = state.kind();
        let Some(step) = self.table.find(from, message.kind()) else {
            return Ok(StepRun::Dropped(DropReason::NoMatchingStep {
                state: from,
                message: message.kind(),
            }));
        };

        let got = envelope.reception.map(|r| r.channel);
        if got != Some(step.channel) {
            return Ok(StepRun::Dropped(DropReason::UnexpectedChannel {
                step: step.name,
                expected: step.channel,
                got,
            }));
        }

        let start = state.clone();
        let next = (step.run)(&self.protocol, ctx, state, message)?;

        if next == start {
            Ok(StepRun::Unchanged { step: step.name, state: from })
        } else if next.is_terminal() {
            Ok(StepRun::Finished { step: step.name, from, terminal: next.kind() })
        } else {
            let blob = next.encode().map_err(StepError::from)?;
            let to = StoredState { kind: next.kind(), blob };
            Ok(StepRun::Advanced { step: step.name, from, to })
        }
    }
}

/// Registry of hosted protocols, built once at startup.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: BTreeMap<ProtocolId, Box<dyn HostedProtocol>>,
}

impl ProtocolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `protocol`, building and checking its step table.
    pub fn register<P: Protocol>(&mut self, protocol: P) -> Result<(), RegistryError> {
        if self.protocols.contains_key(&P::ID) {
            return Err(RegistryError::DuplicateProtocol(P::ID));
        }
        let table = StepTable::build(&protocol)?;
        debug!(protocol = %P::ID, name = P::NAME, steps = table.len(), "protocol registered");
        self.protocols.insert(P::ID, Box::new(Hosted { protocol, table }));
        Ok(())
    }

    /// The protocol registered under `id`.
    pub fn get(&self, id: ProtocolId) -> Result<&dyn HostedProtocol, DecodeError> {
        self.protocols.get(&id).map(|p| &**p).ok_or(DecodeError::UnknownProtocol(id))
    }

    /// Registered protocol ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        self.protocols.keys().copied()
    }

    /// Number of registered protocols.
    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.protocols.values().map(|p| p.name())).finish()
    }
}
