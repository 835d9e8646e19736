//! Protocol definition traits and the per-protocol step table.
//!
//! A hosted protocol is three closed sets: messages, states and steps.
//! Messages and states are enums tagged by [`MessageKind`] and
//! [`StateKind`]. Steps are plain function pointers listed in a
//! [`StepDescriptor`] table keyed by `(start state, message)`; the table is
//! built once when the protocol is registered and rejects duplicate keys.

use std::{collections::HashMap, fmt};

use parley_proto::{
    ChannelKind, DecodeError, EncodeError, Encoded, MessageEnvelope, MessageKind, ProtocolId,
    StateKind,
};

use crate::{
    context::StepContext,
    error::{RegistryError, StepError},
};

/// Concrete messages of one protocol.
pub trait ProtocolMessage: Sized + fmt::Debug {
    /// Tag of this message.
    fn kind(&self) -> MessageKind;

    /// Decode an inbound envelope.
    ///
    /// Fails on an unknown tag or a payload of the wrong shape.
    fn decode(envelope: &MessageEnvelope) -> Result<Self, DecodeError>;

    /// Encode this message's inputs for an outbound envelope.
    fn encode_inputs(&self) -> Result<Vec<Encoded>, EncodeError>;
}

/// Concrete states of one protocol.
pub trait ProtocolState: Sized + Clone + PartialEq + fmt::Debug {
    /// The state of a freshly born instance.
    fn initial() -> Self;

    /// Tag of this state.
    fn kind(&self) -> StateKind;

    /// Whether reaching this state ends the instance.
    fn is_terminal(&self) -> bool;

    /// Encode for persistence.
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;

    /// Decode a persisted blob tagged `kind`.
    fn decode(kind: StateKind, blob: &[u8]) -> Result<Self, DecodeError>;
}

/// A step: transition from `(state, message)` to the next state.
///
/// Returning the start state unchanged means "ignore this message".
pub type StepFn<P> = fn(
    &P,
    &mut StepContext<'_>,
    <P as Protocol>::State,
    <P as Protocol>::Message,
) -> Result<<P as Protocol>::State, StepError>;

/// One row of a protocol's step table.
pub struct StepDescriptor<P: Protocol> {
    /// Step name, for logs
    pub name: &'static str,
    /// State the step starts from
    pub from: StateKind,
    /// Message the step consumes
    pub on: MessageKind,
    /// Channel the message must have arrived on
    pub channel: ChannelKind,
    /// Transition function
    pub run: StepFn<P>,
}

impl<P: Protocol> fmt::Debug for StepDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("from", &self.from)
            .field("on", &self.on)
            .field("channel", &self.channel)
            .finish()
    }
}

/// A hosted protocol definition.
pub trait Protocol: Sized + Send + Sync + 'static {
    /// Protocol tag.
    const ID: ProtocolId;

    /// Human-readable name, for logs.
    const NAME: &'static str;

    /// Kinds of the terminal states.
    const TERMINAL: &'static [StateKind];

    /// Messages that still run from the initial state after the instance
    /// terminated. Such a run must finish or leave nothing behind.
    const LATE_MESSAGES: &'static [MessageKind] = &[];

    /// Message set.
    type Message: ProtocolMessage;

    /// State set.
    type State: ProtocolState;

    /// Exhaustive list of steps.
    fn steps(&self) -> Vec<StepDescriptor<Self>>;
}

/// Step lookup for one protocol, keyed by `(start state, message)`.
pub struct StepTable<P: Protocol> {
    steps: HashMap<(StateKind, MessageKind), StepDescriptor<P>>,
}

impl<P: Protocol> StepTable<P> {
    /// Build the table, rejecting two steps with the same key.
    pub fn build(protocol: &P) -> Result<Self, RegistryError> {
        let descriptors = protocol.steps();
        if descriptors.is_empty() {
            return Err(RegistryError::NoSteps(P::ID));
        }

        let mut steps: HashMap<(StateKind, MessageKind), StepDescriptor<P>> =
            HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let key = (descriptor.from, descriptor.on);
            if let Some(existing) = steps.get(&key) {
                return Err(RegistryError::DuplicateStep {
                    protocol: P::ID,
                    state: descriptor.from,
                    message: descriptor.on,
                    first: existing.name,
                    second: descriptor.name,
                });
            }
            steps.insert(key, descriptor);
        }

        Ok(Self { steps })
    }

    /// The step for `(state, message)`, if any.
    pub fn find(&self, state: StateKind, message: MessageKind) -> Option<&StepDescriptor<P>> {
        self.steps.get(&(state, message))
    }

    /// Every step, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &StepDescriptor<P>> {
        self.steps.values()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the table is empty (never true for a built table).
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
