//! Engine driver.
//!
//! Sans-IO wrapper around [`Engine`]: the runtime feeds [`EngineEvent`]s in
//! and executes the [`EngineAction`]s that come out. Follow-up work an
//! execution creates (messages a step posted back to this engine, contacts
//! that became one-to-one) is drained inline up to
//! [`EngineConfig::max_replay_per_event`]; whatever is left is handed to the
//! runtime as actions, which it feeds back as events.

use std::collections::VecDeque;

use parley_core::{DeliveryHandle, Environment, InstanceKey, StartRequest};
use parley_proto::{
    Identity, MessageEnvelope, OutboundMessage, ReceptionInfo, SendChannel, StateKind,
};
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    engine::{Engine, Execution, Outcome, Started},
    error::EngineError,
    storage::Storage,
};

/// Events that the engine driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A protocol message arrived for an owned identity
    MessageReceived {
        /// Identity the message is addressed to
        owned: Identity,
        /// The message, with reception metadata attached
        envelope: MessageEnvelope,
    },

    /// `contact` became a one-to-one contact of `owned`
    ContactUpgraded {
        /// Owned identity
        owned: Identity,
        /// Upgraded contact
        contact: Identity,
    },

    /// Start a fresh protocol run
    Start {
        /// Identity starting it
        owned: Identity,
        /// What to start
        request: StartRequest,
    },

    /// The runtime just (re)started
    Startup,
}

/// Actions that the engine driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Hand a committed message to the transport
    ///
    /// A `Local` message only shows up here when the event's budget ran out;
    /// feed it back as [`EngineEvent::MessageReceived`] with local reception.
    /// Its handle is `DeliveryHandle(0)`.
    Deliver {
        /// Sending identity
        owned: Identity,
        /// Handle the channel delegate assigned
        handle: DeliveryHandle,
        /// The message
        message: OutboundMessage,
    },

    /// Resolution for this contact did not fit in the event's budget; feed it
    /// back as [`EngineEvent::ContactUpgraded`]
    ContactUpgraded {
        /// Owned identity
        owned: Identity,
        /// Upgraded contact
        contact: Identity,
    },

    /// An instance reached a terminal state
    InstanceFinished {
        /// Finished instance
        key: InstanceKey,
        /// Terminal state
        terminal: StateKind,
    },
}

/// Work created by an execution.
enum FollowUp {
    Local { owned: Identity, envelope: MessageEnvelope },
    Resolve { owned: Identity, contact: Identity },
}

/// Action-based engine driver.
pub struct EngineDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    engine: Engine<E, S>,
}

impl<E, S> EngineDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Wrap an engine.
    pub fn new(engine: Engine<E, S>) -> Self {
        Self { engine }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Engine<E, S> {
        &self.engine
    }

    /// The wrapped engine, mutably.
    pub fn engine_mut(&mut self) -> &mut Engine<E, S> {
        &mut self.engine
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    /// Process an event and return actions to execute.
    ///
    /// Decode errors are logged and yield no actions: the message is
    /// discarded. Other errors of the event's own execution are returned;
    /// failures of follow-up work are logged and skipped.
    pub fn process_event(&mut self, event: EngineEvent) -> Result<Vec<EngineAction>, EngineError> {
        let executions = match event {
            EngineEvent::MessageReceived { owned, envelope } => {
                match self.engine.try_execute(owned, &envelope) {
                    Ok(execution) => vec![execution],
                    Err(EngineError::Decode(err)) => {
                        warn!(
                            %owned,
                            protocol = %envelope.protocol,
                            kind = %envelope.kind,
                            %err,
                            "discarding undecodable message"
                        );
                        return Ok(Vec::new());
                    },
                    Err(err) => return Err(err),
                }
            },
            EngineEvent::ContactUpgraded { owned, contact } => {
                self.engine.resolve_all_for(owned, contact)?
            },
            EngineEvent::Start { owned, request } => match self.engine.start(owned, &request)? {
                Started::Executed(execution) => vec![execution],
                Started::Posted(posted) => {
                    return Ok(vec![EngineAction::Deliver {
                        owned,
                        handle: posted.handle,
                        message: posted.message,
                    }]);
                },
            },
            EngineEvent::Startup => {
                if self.engine.config().replay_pending_on_start {
                    self.engine.replay_pending()?
                } else {
                    Vec::new()
                }
            },
        };

        Ok(self.drain(executions))
    }

    /// Turn executions into actions, running follow-ups inline while the
    /// budget lasts.
    fn drain(&mut self, executions: Vec<Execution>) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let mut queue = VecDeque::new();
        for execution in executions {
            collect(execution, &mut queue, &mut actions);
        }

        let mut budget = self.engine.config().max_replay_per_event;
        while let Some(follow_up) = queue.pop_front() {
            if budget == 0 {
                actions.push(deferred(follow_up));
                continue;
            }
            budget -= 1;

            match follow_up {
                FollowUp::Local { owned, envelope } => {
                    match self.engine.try_execute(owned, &envelope) {
                        Ok(execution) => collect(execution, &mut queue, &mut actions),
                        Err(err) => {
                            warn!(
                                %owned,
                                instance = %envelope.instance,
                                kind = %envelope.kind,
                                %err,
                                "local follow-up failed"
                            );
                        },
                    }
                },
                FollowUp::Resolve { owned, contact } => {
                    match self.engine.resolve_all_for(owned, contact) {
                        Ok(executions) => {
                            for execution in executions {
                                collect(execution, &mut queue, &mut actions);
                            }
                        },
                        Err(err) => {
                            warn!(%owned, %contact, %err, "waiting record resolution failed");
                        },
                    }
                },
            }
        }

        actions
    }
}

fn collect(execution: Execution, queue: &mut VecDeque<FollowUp>, actions: &mut Vec<EngineAction>) {
    let owned = execution.key.owned;

    for posted in execution.deliveries {
        if matches!(posted.message.channel, SendChannel::Local) {
            let envelope = posted.message.envelope.received_on(ReceptionInfo::local());
            queue.push_back(FollowUp::Local { owned, envelope });
        } else {
            actions.push(EngineAction::Deliver {
                owned,
                handle: posted.handle,
                message: posted.message,
            });
        }
    }

    for contact in execution.upgraded {
        queue.push_back(FollowUp::Resolve { owned, contact });
    }

    if let Outcome::Finished { terminal, .. } = execution.outcome {
        debug!(key = %execution.key, %terminal, "reporting finished instance");
        actions.push(EngineAction::InstanceFinished { key: execution.key, terminal });
    }
}

/// Hand a follow-up the budget could not cover to the runtime.
fn deferred(follow_up: FollowUp) -> EngineAction {
    match follow_up {
        FollowUp::Local { owned, envelope } => EngineAction::Deliver {
            owned,
            handle: DeliveryHandle(0),
            message: OutboundMessage::new(SendChannel::Local, envelope),
        },
        FollowUp::Resolve { owned, contact } => EngineAction::ContactUpgraded { owned, contact },
    }
}
