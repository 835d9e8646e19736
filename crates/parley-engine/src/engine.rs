//! Transactional step executor.
//!
//! One call to [`Engine::try_execute`] is one transaction: load the instance
//! (or treat it as `Initial` when absent), run the matching step, and commit
//! the resulting state together with any waiting records the step parked. A
//! step error or a rejected commit discards everything the step did.
//!
//! Accepted outbound messages are released only after commit, as
//! [`Execution::deliveries`]. Staged one-to-one status changes are applied to
//! the identity delegate just before the commit and reverted if it fails.
//!
//! Finishing an instance marks its key terminated. A later message for that
//! key is dropped unless the protocol lists its kind as a late message, in
//! which case it runs from the initial state and must not leave a row.

use std::collections::BTreeMap;

use parley_core::{
    Delegates, DropReason, Environment, InstanceKey, Posted, ProtocolRegistry, StartRequest,
    StatusChange, StepContext, StepEffects, StepError, StepRun, StoredState, WaitingRecord,
};
use parley_proto::{
    DialogContent, Identity, MessageEnvelope, OutboundMessage, ReceptionInfo, SendChannel,
    StateKind,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    error::EngineError,
    storage::{ChangeSet, Storage, StorageOp, StoredInstance},
    transaction::Transaction,
};

/// What one execution did to its instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Moved to a non-terminal state, now persisted.
    Advanced {
        /// Step that ran
        step: &'static str,
        /// Start state
        from: StateKind,
        /// Persisted state
        to: StateKind,
    },
    /// The step ran and ignored the message.
    Unchanged {
        /// Step that ran
        step: &'static str,
        /// Current state
        state: StateKind,
    },
    /// Reached a terminal state; the instance row is gone.
    Finished {
        /// Step that ran
        step: &'static str,
        /// Start state
        from: StateKind,
        /// Terminal state reached
        terminal: StateKind,
    },
    /// No step ran.
    Dropped(DropReason),
}

/// A committed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Instance the message was addressed to
    pub key: InstanceKey,
    /// What happened to it
    pub outcome: Outcome,
    /// Messages accepted by the channel delegate, to hand to the transport
    pub deliveries: Vec<Posted>,
    /// One-to-one status changes the step asked for
    pub status_changes: BTreeMap<Identity, bool>,
    /// Contacts that actually became one-to-one when the changes were
    /// applied
    pub upgraded: Vec<Identity>,
}

/// What starting a protocol produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Started {
    /// The initial message was local and ran right away.
    Executed(Execution),
    /// The initial message was posted to the channel delegate.
    Posted(Posted),
}

/// An instance as the executor would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceView {
    /// No row; the next message runs against `initial`.
    Absent {
        /// Initial state of the protocol
        initial: StoredState,
    },
    /// A live row.
    Stored(StoredInstance),
}

impl InstanceView {
    /// State the next message would run against.
    pub fn state(&self) -> &StoredState {
        match self {
            Self::Absent { initial } => initial,
            Self::Stored(stored) => &stored.state,
        }
    }

    /// Whether the instance has a row.
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

/// Protocol execution engine.
///
/// Owns the registry and the injected delegates; shares storage with
/// whoever else holds a clone of `S`.
pub struct Engine<E, S>
where
    E: Environment,
    S: Storage,
{
    env: E,
    storage: S,
    registry: ProtocolRegistry,
    delegates: Delegates,
    config: EngineConfig,
}

impl<E, S> Engine<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create an engine.
    pub fn new(
        env: E,
        storage: S,
        registry: ProtocolRegistry,
        delegates: Delegates,
        config: EngineConfig,
    ) -> Self {
        Self { env, storage, registry, delegates, config }
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Hosted protocols.
    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Run `envelope` against the instance it addresses, owned by `owned`.
    ///
    /// # Errors
    ///
    /// - `EngineError::Decode` if the protocol, message or stored state is
    ///   unknown or malformed
    /// - `EngineError::Step` if the step or a status change failed
    /// - `EngineError::Storage` if loading or committing failed
    /// - `EngineError::InvariantViolation` for broken protocol definitions
    ///
    /// Nothing is committed, delivered or left changed in the identity
    /// delegate on error.
    pub fn try_execute(
        &mut self,
        owned: Identity,
        envelope: &MessageEnvelope,
    ) -> Result<Execution, EngineError> {
        let key = InstanceKey { protocol: envelope.protocol, instance: envelope.instance, owned };
        self.execute(key, envelope, None)
    }

    /// Replay every waiting record of `owned` about `remote`.
    ///
    /// Called once `remote` became a one-to-one contact of `owned`. A replay
    /// whose step ignored the message keeps its record, as the status it
    /// read may already be stale again; any other replay deletes the record
    /// in the transaction that ran it. A replay that fails keeps its record
    /// and is logged; the others still run.
    pub fn resolve_all_for(
        &mut self,
        owned: Identity,
        remote: Identity,
    ) -> Result<Vec<Execution>, EngineError> {
        let records = self.storage.waiting_for(&owned, &remote)?;
        debug!(%owned, %remote, count = records.len(), "resolving waiting records");

        let mut executions = Vec::with_capacity(records.len());
        for record in records {
            let key = record.instance_key();
            let pending = record.pending;
            let envelope = MessageEnvelope::new(record.protocol, record.instance, pending)
                .received_on(ReceptionInfo::local());
            match self.execute(key, &envelope, Some(record)) {
                Ok(execution) => executions.push(execution),
                Err(err) => {
                    warn!(%key, %pending, %err, "waiting record replay failed");
                },
            }
        }
        Ok(executions)
    }

    /// Re-deliver every waiting record without deleting it.
    ///
    /// Used at startup, when no one knows whether a precondition became true
    /// while the engine was down. Steps treat an unmet precondition as a
    /// no-op.
    pub fn replay_pending(&mut self) -> Result<Vec<Execution>, EngineError> {
        let records = self.storage.list_waiting()?;
        info!(count = records.len(), "replaying waiting records");

        let mut executions = Vec::with_capacity(records.len());
        for record in records {
            let key = record.instance_key();
            let pending = record.pending;
            let envelope = MessageEnvelope::new(record.protocol, record.instance, pending)
                .received_on(ReceptionInfo::local());
            match self.execute(key, &envelope, None) {
                Ok(execution) => executions.push(execution),
                Err(err) => {
                    warn!(%key, %pending, %err, "startup replay failed");
                },
            }
        }
        Ok(executions)
    }

    /// Start a fresh protocol run for `owned`.
    ///
    /// A local initial message runs immediately; any other is posted through
    /// the channel delegate.
    pub fn start(
        &mut self,
        owned: Identity,
        request: &StartRequest,
    ) -> Result<Started, EngineError> {
        let message = self.delegates.starter.initial_message_for(&owned, request, &self.env)?;

        if matches!(message.channel, SendChannel::Local) {
            let envelope = message.envelope.received_on(ReceptionInfo::local());
            return self.try_execute(owned, &envelope).map(Started::Executed);
        }

        let handle = self.delegates.channel.post(&owned, &message).map_err(StepError::from)?;
        debug!(%owned, %handle, channel = %message.channel.kind(), "initial message posted");
        Ok(Started::Posted(Posted { handle, message }))
    }

    /// Load an instance, distinguishing an absent row from a stored one.
    pub fn load_or_initial(&self, key: &InstanceKey) -> Result<InstanceView, EngineError> {
        let hosted = self.registry.get(key.protocol)?;
        match self.storage.load_instance(key)? {
            Some(stored) => Ok(InstanceView::Stored(stored)),
            None => {
                let initial = hosted.initial_state().map_err(StepError::from)?;
                Ok(InstanceView::Absent { initial })
            },
        }
    }

    /// One transaction. `consumed` is the waiting record being replayed,
    /// if any.
    fn execute(
        &mut self,
        key: InstanceKey,
        envelope: &MessageEnvelope,
        consumed: Option<WaitingRecord>,
    ) -> Result<Execution, EngineError> {
        let hosted = self.registry.get(key.protocol)?;
        let loaded = self.storage.load_instance(&key)?;
        let revision = loaded.as_ref().map_or(0, |stored| stored.revision);
        let current = loaded.as_ref().map_or(StateKind::INITIAL, |stored| stored.state.kind);
        let terminated = loaded.is_none() && self.storage.is_terminated(&key)?;
        let late = hosted.runs_after_termination(envelope.kind);

        let (run, effects, parked) = if terminated && !late {
            (Ok(StepRun::Dropped(DropReason::Terminated)), StepEffects::default(), Vec::new())
        } else {
            let mut txn = Transaction::new(&self.storage, key, current);
            let Delegates { channel, identity, starter } = &mut self.delegates;
            let mut ctx = StepContext::new(
                key,
                envelope.reception,
                &mut **channel,
                &**identity,
                &**starter,
                &mut txn,
                &self.env,
            );
            let run = hosted.run(loaded.as_ref().map(|stored| &stored.state), envelope, &mut ctx);
            let effects = ctx.into_effects();
            (run, effects, txn.into_parked())
        };

        let run = match run {
            Ok(run) => run,
            Err(err) => {
                let err = EngineError::from(err);
                match &err {
                    EngineError::InvariantViolation(msg) => {
                        error!(
                            %key,
                            kind = %envelope.kind,
                            %msg,
                            "invariant violation, rolled back"
                        );
                    },
                    _ => warn!(%key, kind = %envelope.kind, %err, "step rolled back"),
                }
                return Err(err);
            },
        };

        // A late message may only close or ignore a terminated instance.
        let resurrects = match &run {
            StepRun::Advanced { .. } => true,
            StepRun::Unchanged { .. } => !parked.is_empty(),
            StepRun::Dropped(_) | StepRun::Finished { .. } => false,
        };
        if terminated && resurrects {
            let msg = format!("{} would bring back terminated {key}", envelope.kind);
            error!(%key, kind = %envelope.kind, %msg, "invariant violation, rolled back");
            return Err(EngineError::InvariantViolation(msg));
        }

        let mut ops = Vec::new();
        let outcome = match run {
            StepRun::Dropped(reason) => {
                ops.extend(consumed.map(StorageOp::DeleteWaiting));
                Outcome::Dropped(reason)
            },
            StepRun::Unchanged { step, state } => {
                // Parking needs a row to hang off; rewriting it also checks
                // the revision.
                if !parked.is_empty() {
                    let stored = match &loaded {
                        Some(stored) => stored.state.clone(),
                        None => hosted.initial_state().map_err(StepError::from)?,
                    };
                    ops.extend(parked.into_iter().map(StorageOp::PutWaiting));
                    ops.push(StorageOp::PutInstance {
                        key,
                        state: stored,
                        expected_revision: revision,
                    });
                }
                Outcome::Unchanged { step, state }
            },
            StepRun::Advanced { step, from, to } => {
                let kind = to.kind;
                ops.extend(consumed.map(StorageOp::DeleteWaiting));
                ops.extend(parked.into_iter().map(StorageOp::PutWaiting));
                ops.push(StorageOp::PutInstance { key, state: to, expected_revision: revision });
                Outcome::Advanced { step, from, to: kind }
            },
            StepRun::Finished { step, from, terminal } => {
                ops.extend(consumed.map(StorageOp::DeleteWaiting));
                if loaded.is_some() {
                    ops.push(StorageOp::DeleteInstance { key, expected_revision: revision });
                }
                ops.push(StorageOp::MarkTerminated { key });
                Outcome::Finished { step, from, terminal }
            },
        };

        let applied = self.apply_status_changes(&key, &effects.status_changes)?;

        let changes = ChangeSet { ops, committed_at_secs: self.env.wall_clock_secs() };
        if !changes.is_empty() {
            if let Err(err) = self.storage.commit(&changes) {
                warn!(%key, %err, "commit rejected, rolled back");
                self.revert_status_changes(&key.owned, &applied);
                return Err(err.into());
            }
        }

        let mut deliveries = effects.posted;
        let mut upgraded = Vec::new();
        for (contact, change) in applied {
            match change {
                StatusChange::Upgraded => {
                    info!(owned = %key.owned, %contact, "contact upgraded to one-to-one");
                    upgraded.push(contact);
                },
                StatusChange::Downgraded => {
                    info!(owned = %key.owned, %contact, "contact downgraded from one-to-one");
                },
                StatusChange::Unchanged => {},
            }
        }

        match &outcome {
            Outcome::Advanced { step, from, to } => {
                info!(%key, step, %from, %to, deliveries = deliveries.len(), "instance advanced");
            },
            Outcome::Finished { step, from, terminal } => {
                info!(
                    %key,
                    step,
                    %from,
                    %terminal,
                    deliveries = deliveries.len(),
                    "instance finished"
                );
            },
            Outcome::Unchanged { step, state } => {
                debug!(%key, step, %state, "message ignored by step");
            },
            Outcome::Dropped(reason) => {
                debug!(%key, kind = %envelope.kind, %reason, "message dropped");
                if let Some(posted) = self.dismiss_orphan_dialog(&key, envelope) {
                    deliveries.push(posted);
                }
            },
        }

        Ok(Execution { key, outcome, deliveries, status_changes: effects.status_changes, upgraded })
    }

    /// Apply staged status changes ahead of the commit. A failure reverts
    /// the changes already made and abandons the transaction.
    fn apply_status_changes(
        &mut self,
        key: &InstanceKey,
        changes: &BTreeMap<Identity, bool>,
    ) -> Result<Vec<(Identity, StatusChange)>, EngineError> {
        let owned = &key.owned;
        let mut applied = Vec::with_capacity(changes.len());
        for (contact, one_to_one) in changes {
            let identity = &mut self.delegates.identity;
            match identity.reset_one_to_one_contact_status(owned, contact, *one_to_one) {
                Ok(change) => applied.push((*contact, change)),
                Err(err) => {
                    warn!(%key, %contact, one_to_one, %err, "status change failed, rolled back");
                    self.revert_status_changes(owned, &applied);
                    return Err(StepError::from(err).into());
                },
            }
        }
        Ok(applied)
    }

    /// Undo `applied`, newest first.
    fn revert_status_changes(&mut self, owned: &Identity, applied: &[(Identity, StatusChange)]) {
        for (contact, change) in applied.iter().rev() {
            let previous = match change {
                StatusChange::Upgraded => false,
                StatusChange::Downgraded => true,
                StatusChange::Unchanged => continue,
            };
            let identity = &mut self.delegates.identity;
            if let Err(err) = identity.reset_one_to_one_contact_status(owned, contact, previous) {
                error!(%owned, %contact, previous, %err, "status change could not be reverted");
            }
        }
    }

    /// The user answered a prompt whose instance moved on; take it down.
    fn dismiss_orphan_dialog(
        &mut self,
        key: &InstanceKey,
        envelope: &MessageEnvelope,
    ) -> Option<Posted> {
        if !self.config.dismiss_orphan_dialogs {
            return None;
        }
        let response = envelope.dialog_response.as_ref()?;

        let message = OutboundMessage::new(
            SendChannel::UserInterface {
                dialog_id: response.dialog_id,
                content: DialogContent::Delete,
            },
            MessageEnvelope::new(key.protocol, key.instance, envelope.kind),
        );
        match self.delegates.channel.post(&key.owned, &message) {
            Ok(handle) => {
                debug!(%key, dialog = %response.dialog_id, "orphan dialog dismissed");
                Some(Posted { handle, message })
            },
            Err(err) => {
                warn!(%key, dialog = %response.dialog_id, %err, "could not dismiss orphan dialog");
                None
            },
        }
    }
}

impl<E, S> std::fmt::Debug for Engine<E, S>
where
    E: Environment,
    S: Storage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
