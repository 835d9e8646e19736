//! One-to-one contact invitation protocol.
//!
//! Alice invites Bob to become a one-to-one contact. Bob's devices show a
//! prompt; the answer comes back to Alice, and both sides record the new
//! status. Crossed invitations resolve without asking anyone, cancellations
//! and answers are mirrored to sibling devices, and a separate run compares
//! the status two contacts hold about each other and repairs disagreements.
//!
//! Messages reach the engine on one of three channels. Each step names the
//! channel it accepts:
//!
//! | step | from | on | channel |
//! |------|------|----|---------|
//! | `AliceInvitesBob` | Initial | Initial | local |
//! | `BobProcessesAlicesInvitation` | Initial | OneToOneInvitation | contact |
//! | `BobRespondsToAlicesInvitation` | InvitationReceived | DialogAccept | local |
//! | `AliceReceivesBobsResponse` | InvitationSent | OneToOneResponse | contact |
//! | `AliceAbortsHerInvitationToBob` | InvitationSent | DialogInvitationSent | local |
//! | `BobProcessesAbort` | InvitationReceived | Abort | contact |
//! | `ContactUpgradedWhileInvitationSent` | InvitationSent | ContactUpgraded | local |
//! | `ContactUpgradedWhileInvitationReceived` | InvitationReceived | ContactUpgraded | local |
//! | `ProcessPropagatedInvitation` | Initial | PropagateOneToOneInvitation | owned device |
//! | `ProcessPropagatedResponse` | InvitationReceived | PropagateOneToOneResponse | owned device |
//! | `ProcessPropagatedAbort` | InvitationSent | PropagateAbort | owned device |
//! | `AliceProcessesUnexpectedBobResponse` | Initial | OneToOneResponse | contact |
//! | `AliceSendsStatusSyncRequests` | Initial | InitialOneToOneStatusSyncRequest | local |
//! | `BobProcessesStatusSyncRequest` | Initial | OneToOneStatusSyncRequest | contact |
//!
//! `DialogAccept` is `DialogAcceptOneToOneInvitation` and `ContactUpgraded` is
//! `ContactUpgradedToOneToOne`.

mod messages;
mod states;
mod steps;

use parley_proto::{ChannelKind, MessageKind, ProtocolId, StateKind};
use serde::{Deserialize, Serialize};

pub use messages::OneToOneMessage;
pub use states::OneToOneState;

use crate::{
    error::RegistryError,
    protocol::{Protocol, StepDescriptor},
    registry::ProtocolRegistry,
};

/// Message tags.
pub mod kind {
    use parley_proto::MessageKind;

    /// Programmatic start of an invitation
    pub const INITIAL: MessageKind = MessageKind(0);
    /// Invitation sent to the contact
    pub const ONE_TO_ONE_INVITATION: MessageKind = MessageKind(1);
    /// Answer to the "invitation sent" prompt
    pub const DIALOG_INVITATION_SENT: MessageKind = MessageKind(2);
    /// Invitation mirrored to sibling devices
    pub const PROPAGATE_ONE_TO_ONE_INVITATION: MessageKind = MessageKind(3);
    /// Answer to the "invitation received" prompt
    pub const DIALOG_ACCEPT_ONE_TO_ONE_INVITATION: MessageKind = MessageKind(4);
    /// Invitee's answer
    pub const ONE_TO_ONE_RESPONSE: MessageKind = MessageKind(5);
    /// Answer mirrored to sibling devices
    pub const PROPAGATE_ONE_TO_ONE_RESPONSE: MessageKind = MessageKind(6);
    /// Inviter cancelled
    pub const ABORT: MessageKind = MessageKind(7);
    /// Local replay once the contact became one-to-one
    pub const CONTACT_UPGRADED_TO_ONE_TO_ONE: MessageKind = MessageKind(8);
    /// Cancellation mirrored to sibling devices
    pub const PROPAGATE_ABORT: MessageKind = MessageKind(9);
    /// Programmatic start of a status sync
    pub const INITIAL_ONE_TO_ONE_STATUS_SYNC_REQUEST: MessageKind = MessageKind(10);
    /// Sender's view of the recipient's status
    pub const ONE_TO_ONE_STATUS_SYNC_REQUEST: MessageKind = MessageKind(11);
    /// Answer kind of prompt deletions; never sent back
    pub const DIALOG_INFORMATIVE: MessageKind = MessageKind(100);
}

/// State tags.
pub mod state_kind {
    use parley_proto::StateKind;

    /// Freshly born
    pub const INITIAL: StateKind = StateKind::INITIAL;
    /// Waiting for the invitee
    pub const INVITATION_SENT: StateKind = StateKind(1);
    /// Waiting for the local user
    pub const INVITATION_RECEIVED: StateKind = StateKind(2);
    /// Ended normally
    pub const FINISHED: StateKind = StateKind(3);
    /// Ended early
    pub const CANCELLED: StateKind = StateKind(4);
}

/// How to repair a one-to-one status disagreement between two contacts.
///
/// Both parties must run the same policy; mixed policies can keep
/// exchanging sync requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusSyncPolicy {
    /// Whoever says "not one-to-one" wins.
    #[default]
    PreferDowngrade,
    /// Whoever says "one-to-one" wins.
    PreferUpgrade,
}

/// Tunables of the invitation protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationConfig {
    /// Disagreement resolution
    pub sync_policy: StatusSyncPolicy,
}

/// The one-to-one contact invitation protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneToOneInvitationProtocol {
    config: InvitationConfig,
}

impl OneToOneInvitationProtocol {
    /// Protocol with the given tunables.
    pub fn new(config: InvitationConfig) -> Self {
        Self { config }
    }

    /// Tunables in effect.
    pub fn config(&self) -> &InvitationConfig {
        &self.config
    }
}

impl Protocol for OneToOneInvitationProtocol {
    const ID: ProtocolId = ProtocolId(15);
    const NAME: &'static str = "one-to-one-contact-invitation";
    const TERMINAL: &'static [StateKind] = &[state_kind::FINISHED, state_kind::CANCELLED];
    // A contact answering an invitation we already closed still gets its
    // status reconciled.
    const LATE_MESSAGES: &'static [MessageKind] = &[kind::ONE_TO_ONE_RESPONSE];

    type Message = OneToOneMessage;
    type State = OneToOneState;

    fn steps(&self) -> Vec<StepDescriptor<Self>> {
        vec![
            StepDescriptor {
                name: "AliceInvitesBob",
                from: state_kind::INITIAL,
                on: kind::INITIAL,
                channel: ChannelKind::Local,
                run: steps::alice_invites_bob,
            },
            StepDescriptor {
                name: "BobProcessesAlicesInvitation",
                from: state_kind::INITIAL,
                on: kind::ONE_TO_ONE_INVITATION,
                channel: ChannelKind::Contact,
                run: steps::bob_processes_alices_invitation,
            },
            StepDescriptor {
                name: "BobRespondsToAlicesInvitation",
                from: state_kind::INVITATION_RECEIVED,
                on: kind::DIALOG_ACCEPT_ONE_TO_ONE_INVITATION,
                channel: ChannelKind::Local,
                run: steps::bob_responds_to_alices_invitation,
            },
            StepDescriptor {
                name: "AliceReceivesBobsResponse",
                from: state_kind::INVITATION_SENT,
                on: kind::ONE_TO_ONE_RESPONSE,
                channel: ChannelKind::Contact,
                run: steps::alice_receives_bobs_response,
            },
            StepDescriptor {
                name: "AliceAbortsHerInvitationToBob",
                from: state_kind::INVITATION_SENT,
                on: kind::DIALOG_INVITATION_SENT,
                channel: ChannelKind::Local,
                run: steps::alice_aborts_her_invitation_to_bob,
            },
            StepDescriptor {
                name: "BobProcessesAbort",
                from: state_kind::INVITATION_RECEIVED,
                on: kind::ABORT,
                channel: ChannelKind::Contact,
                run: steps::bob_processes_abort,
            },
            StepDescriptor {
                name: "ContactUpgradedWhileInvitationSent",
                from: state_kind::INVITATION_SENT,
                on: kind::CONTACT_UPGRADED_TO_ONE_TO_ONE,
                channel: ChannelKind::Local,
                run: steps::contact_upgraded,
            },
            StepDescriptor {
                name: "ContactUpgradedWhileInvitationReceived",
                from: state_kind::INVITATION_RECEIVED,
                on: kind::CONTACT_UPGRADED_TO_ONE_TO_ONE,
                channel: ChannelKind::Local,
                run: steps::contact_upgraded,
            },
            StepDescriptor {
                name: "ProcessPropagatedInvitation",
                from: state_kind::INITIAL,
                on: kind::PROPAGATE_ONE_TO_ONE_INVITATION,
                channel: ChannelKind::OwnedDevice,
                run: steps::process_propagated_invitation,
            },
            StepDescriptor {
                name: "ProcessPropagatedResponse",
                from: state_kind::INVITATION_RECEIVED,
                on: kind::PROPAGATE_ONE_TO_ONE_RESPONSE,
                channel: ChannelKind::OwnedDevice,
                run: steps::process_propagated_response,
            },
            StepDescriptor {
                name: "ProcessPropagatedAbort",
                from: state_kind::INVITATION_SENT,
                on: kind::PROPAGATE_ABORT,
                channel: ChannelKind::OwnedDevice,
                run: steps::process_propagated_abort,
            },
            StepDescriptor {
                name: "AliceProcessesUnexpectedBobResponse",
                from: state_kind::INITIAL,
                on: kind::ONE_TO_ONE_RESPONSE,
                channel: ChannelKind::Contact,
                run: steps::alice_processes_unexpected_bob_response,
            },
            StepDescriptor {
                name: "AliceSendsStatusSyncRequests",
                from: state_kind::INITIAL,
                on: kind::INITIAL_ONE_TO_ONE_STATUS_SYNC_REQUEST,
                channel: ChannelKind::Local,
                run: steps::alice_sends_status_sync_requests,
            },
            StepDescriptor {
                name: "BobProcessesStatusSyncRequest",
                from: state_kind::INITIAL,
                on: kind::ONE_TO_ONE_STATUS_SYNC_REQUEST,
                channel: ChannelKind::Contact,
                run: steps::bob_processes_status_sync_request,
            },
        ]
    }
}

/// Registry hosting the invitation protocol with `config`.
pub fn registry(config: InvitationConfig) -> Result<ProtocolRegistry, RegistryError> {
    let mut registry = ProtocolRegistry::new();
    registry.register(OneToOneInvitationProtocol::new(config))?;
    Ok(registry)
}
