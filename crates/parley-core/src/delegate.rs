//! Contracts of the engine's external collaborators.
//!
//! The engine consumes three narrow delegates: a channel delegate that
//! accepts outbound messages, an identity delegate that answers (and updates)
//! trust questions about contacts, and a protocol starter that builds the
//! initial message of a fresh protocol run. All three are injected when the
//! engine is constructed; see [`Delegates`].

use std::{collections::BTreeSet, fmt};

use parley_proto::{Identity, OutboundMessage};

use crate::{
    env::Prng,
    error::{ChannelError, IdentityError, StepError},
};

/// Handle returned by the channel delegate for an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryHandle(pub u64);

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Accepts outbound messages on behalf of the transport.
///
/// `post` is called from inside a step's transaction. It checks that the
/// message can be routed (a confirmed secure channel exists, the owned
/// identity has sibling devices, ...) and returns a handle. The engine keeps
/// accepted messages in the transaction's outbox and only hands them over as
/// deliveries once the transaction commits; a rollback discards them.
///
/// Must not block indefinitely.
pub trait ChannelDelegate: Send {
    /// Accept `message`, sent by `owned`, for delivery.
    fn post(
        &mut self,
        owned: &Identity,
        message: &OutboundMessage,
    ) -> Result<DeliveryHandle, ChannelError>;
}

/// Result of a one-to-one status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Status already had the requested value.
    Unchanged,
    /// Contact became one-to-one.
    Upgraded,
    /// Contact stopped being one-to-one.
    Downgraded,
}

/// Identity and contact database.
pub trait IdentityDelegate: Send {
    /// Whether `contact` is a contact of `owned` at all.
    fn is_contact_of(&self, owned: &Identity, contact: &Identity) -> Result<bool, IdentityError>;

    /// Whether `contact` is a one-to-one contact of `owned`.
    fn is_one_to_one_contact(
        &self,
        owned: &Identity,
        contact: &Identity,
    ) -> Result<bool, IdentityError>;

    /// Set the one-to-one status of `contact`.
    ///
    /// Returns how the status moved. Setting the status of an identity that
    /// is not a contact is a no-op reported as [`StatusChange::Unchanged`].
    fn reset_one_to_one_contact_status(
        &mut self,
        owned: &Identity,
        contact: &Identity,
        one_to_one: bool,
    ) -> Result<StatusChange, IdentityError>;

    /// Number of devices of `owned`, excluding this one.
    fn other_device_count(&self, owned: &Identity) -> Result<usize, IdentityError>;
}

/// Protocol runs another component (or a step) may ask to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRequest {
    /// Invite `contact` to become a one-to-one contact.
    OneToOneInvitation {
        /// Contact to invite
        contact: Identity,
    },
    /// Tell `contact` we no longer consider them one-to-one.
    DowngradeOneToOne {
        /// Contact to downgrade
        contact: Identity,
    },
    /// Compare one-to-one status with each of `contacts`.
    OneToOneStatusSync {
        /// Contacts to sync with
        contacts: BTreeSet<Identity>,
    },
}

/// Builds the initial message of a fresh protocol run.
pub trait ProtocolStarterDelegate: Send + Sync {
    /// Initial message for `request`, sent by `owned`.
    ///
    /// Messages addressed to the engine itself use a `Local` channel; the
    /// caller posts them like any other outbound message.
    fn initial_message_for(
        &self,
        owned: &Identity,
        request: &StartRequest,
        prng: &dyn Prng,
    ) -> Result<OutboundMessage, StepError>;
}

/// The engine's collaborators, injected at construction.
pub struct Delegates {
    /// Outbound message acceptor
    pub channel: Box<dyn ChannelDelegate>,
    /// Identity database
    pub identity: Box<dyn IdentityDelegate>,
    /// Initial-message builder
    pub starter: Box<dyn ProtocolStarterDelegate>,
}

impl Delegates {
    /// Start building a delegate set.
    pub fn builder() -> DelegatesBuilder {
        DelegatesBuilder::default()
    }
}

impl fmt::Debug for Delegates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegates").finish_non_exhaustive()
    }
}

/// Builder for [`Delegates`].
///
/// Engine wiring is often spread across components; a missing collaborator
/// is caught here instead of at the first message.
#[derive(Default)]
pub struct DelegatesBuilder {
    channel: Option<Box<dyn ChannelDelegate>>,
    identity: Option<Box<dyn IdentityDelegate>>,
    starter: Option<Box<dyn ProtocolStarterDelegate>>,
}

impl DelegatesBuilder {
    /// Set the channel delegate.
    #[must_use]
    pub fn channel(mut self, channel: impl ChannelDelegate + 'static) -> Self {
        self.channel = Some(Box::new(channel));
        self
    }

    /// Set the identity delegate.
    #[must_use]
    pub fn identity(mut self, identity: impl IdentityDelegate + 'static) -> Self {
        self.identity = Some(Box::new(identity));
        self
    }

    /// Set the protocol starter.
    #[must_use]
    pub fn starter(mut self, starter: impl ProtocolStarterDelegate + 'static) -> Self {
        self.starter = Some(Box::new(starter));
        self
    }

    /// Finish, failing if any collaborator is unset.
    pub fn build(self) -> Result<Delegates, StepError> {
        let missing =
            |name: &str| StepError::InvariantViolation(format!("{name} delegate is not set"));
        Ok(Delegates {
            channel: self.channel.ok_or_else(|| missing("channel"))?,
            identity: self.identity.ok_or_else(|| missing("identity"))?,
            starter: self.starter.ok_or_else(|| missing("protocol starter"))?,
        })
    }
}
