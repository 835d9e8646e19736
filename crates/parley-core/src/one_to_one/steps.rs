//! Step functions of the one-to-one invitation protocol.
//!
//! Status changes are staged on the context and applied when the step's
//! transaction commits; [`StepContext::is_one_to_one`] already sees them.

use parley_proto::{
    Dialog, DialogContent, DialogId, Encoded, Identity, MessageEnvelope, MessageKind,
    OutboundMessage, SendChannel,
};
use tracing::{debug, warn};

use super::{
    OneToOneInvitationProtocol, OneToOneMessage, OneToOneState, StatusSyncPolicy, kind, state_kind,
};
use crate::{
    context::StepContext,
    delegate::StartRequest,
    error::StepError,
    protocol::Protocol,
};

type Step = Result<OneToOneState, StepError>;

fn mismatch(step: &str, message: &OneToOneMessage) -> StepError {
    StepError::InvariantViolation(format!("{step} dispatched on {message:?}"))
}

fn delete_dialog(ctx: &mut StepContext<'_>, dialog_id: DialogId) -> Result<(), StepError> {
    ctx.post_dialog(dialog_id, DialogContent::Delete, kind::DIALOG_INFORMATIVE)?;
    Ok(())
}

/// Mirror a decision to sibling devices. Failure is logged, never fatal.
fn propagate(ctx: &mut StepContext<'_>, message: MessageKind, inputs: Vec<Encoded>) {
    match ctx.other_device_count() {
        Ok(0) => {},
        Ok(_) => {
            if let Err(err) = ctx.send(SendChannel::OwnedDevices, message, inputs) {
                warn!(
                    instance = %ctx.instance(),
                    %message,
                    %err,
                    "propagation to other devices failed"
                );
            }
        },
        Err(err) => warn!(instance = %ctx.instance(), %err, "could not count other devices"),
    }
}

/// Whether the owned identity has an invitation of its own pending towards
/// `contact`.
fn has_pending_invitation(ctx: &StepContext<'_>, contact: &Identity) -> Result<bool, StepError> {
    let protocol = ctx.protocol();
    Ok(ctx
        .waiting_for(contact)?
        .iter()
        .any(|w| w.record.protocol == protocol && w.state == Some(state_kind::INVITATION_SENT)))
}

/// Tell `contact` how we see them, in a fresh run.
fn send_sync_request(
    ctx: &mut StepContext<'_>,
    contact: Identity,
    considers_one_to_one: bool,
) -> Result<(), StepError> {
    let envelope = MessageEnvelope::new(
        OneToOneInvitationProtocol::ID,
        ctx.new_instance_id(),
        kind::ONE_TO_ONE_STATUS_SYNC_REQUEST,
    )
    .with_inputs(vec![Encoded::encode(&considers_one_to_one)?]);
    ctx.post(OutboundMessage::new(SendChannel::contact(contact), envelope))?;
    Ok(())
}

pub(super) fn alice_invites_bob(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    _: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let OneToOneMessage::Initial { contact } = message else {
        return Err(mismatch("AliceInvitesBob", &message));
    };

    let dialog_id = ctx.new_dialog_id();
    ctx.post_dialog(
        dialog_id,
        DialogContent::Show(Dialog::OneToOneInvitationSent { contact }),
        kind::DIALOG_INVITATION_SENT,
    )?;
    ctx.send(SendChannel::contact(contact), kind::ONE_TO_ONE_INVITATION, Vec::new())?;
    ctx.park(contact, kind::CONTACT_UPGRADED_TO_ONE_TO_ONE)?;
    propagate(ctx, kind::PROPAGATE_ONE_TO_ONE_INVITATION, vec![Encoded::encode(&contact)?]);

    Ok(OneToOneState::InvitationSent { contact, dialog_id })
}

pub(super) fn bob_processes_alices_invitation(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    _: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let OneToOneMessage::OneToOneInvitation = message else {
        return Err(mismatch("BobProcessesAlicesInvitation", &message));
    };
    let Some(contact) = ctx.remote_identity() else {
        warn!(instance = %ctx.instance(), "invitation without a remote identity");
        return Ok(OneToOneState::Cancelled);
    };

    let accept = vec![Encoded::encode(&true)?];
    if ctx.is_one_to_one(&contact)? {
        ctx.send(SendChannel::contact(contact), kind::ONE_TO_ONE_RESPONSE, accept)?;
        return Ok(OneToOneState::Finished);
    }

    // Crossed invitations: both sides asked, so both sides agree.
    if has_pending_invitation(ctx, &contact)? {
        debug!(instance = %ctx.instance(), %contact, "crossed invitation, accepting");
        ctx.reset_one_to_one_status(contact, true);
        ctx.send(SendChannel::contact(contact), kind::ONE_TO_ONE_RESPONSE, accept)?;
        return Ok(OneToOneState::Finished);
    }

    let dialog_id = ctx.new_dialog_id();
    ctx.post_dialog(
        dialog_id,
        DialogContent::Show(Dialog::OneToOneInvitationReceived { contact }),
        kind::DIALOG_ACCEPT_ONE_TO_ONE_INVITATION,
    )?;
    ctx.park(contact, kind::CONTACT_UPGRADED_TO_ONE_TO_ONE)?;

    Ok(OneToOneState::InvitationReceived { contact, dialog_id })
}

pub(super) fn bob_responds_to_alices_invitation(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (
        OneToOneState::InvitationReceived { contact, dialog_id },
        OneToOneMessage::DialogAcceptOneToOneInvitation { accepted },
    ) = (state, &message)
    else {
        return Err(mismatch("BobRespondsToAlicesInvitation", &message));
    };
    let accepted = *accepted;

    if !ctx.is_contact(&contact)? {
        delete_dialog(ctx, dialog_id)?;
        return Ok(OneToOneState::Finished);
    }

    ctx.send(
        SendChannel::contact(contact),
        kind::ONE_TO_ONE_RESPONSE,
        vec![Encoded::encode(&accepted)?],
    )?;
    ctx.reset_one_to_one_status(contact, accepted);
    delete_dialog(ctx, dialog_id)?;
    propagate(ctx, kind::PROPAGATE_ONE_TO_ONE_RESPONSE, vec![Encoded::encode(&accepted)?]);

    Ok(OneToOneState::Finished)
}

pub(super) fn alice_receives_bobs_response(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (
        OneToOneState::InvitationSent { contact, dialog_id },
        OneToOneMessage::OneToOneResponse { accepted },
    ) = (state, &message)
    else {
        return Err(mismatch("AliceReceivesBobsResponse", &message));
    };

    let Some(remote) = ctx.remote_identity() else {
        warn!(instance = %ctx.instance(), "response without a remote identity");
        return Ok(OneToOneState::Cancelled);
    };
    if remote != contact {
        debug!(
            instance = %ctx.instance(),
            %remote,
            %contact,
            "response from an unexpected identity"
        );
        return Ok(state);
    }

    ctx.reset_one_to_one_status(contact, *accepted);
    delete_dialog(ctx, dialog_id)?;

    Ok(OneToOneState::Finished)
}

pub(super) fn alice_aborts_her_invitation_to_bob(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (
        OneToOneState::InvitationSent { contact, dialog_id },
        OneToOneMessage::DialogInvitationSent { cancel },
    ) = (state, &message)
    else {
        return Err(mismatch("AliceAbortsHerInvitationToBob", &message));
    };

    if !ctx.is_contact(&contact)? {
        delete_dialog(ctx, dialog_id)?;
        return Ok(OneToOneState::Finished);
    }
    if !*cancel {
        return Ok(state);
    }

    ctx.send(SendChannel::contact(contact), kind::ABORT, Vec::new())?;
    ctx.reset_one_to_one_status(contact, false);
    delete_dialog(ctx, dialog_id)?;
    propagate(ctx, kind::PROPAGATE_ABORT, Vec::new());

    Ok(OneToOneState::Finished)
}

pub(super) fn bob_processes_abort(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (OneToOneState::InvitationReceived { contact, dialog_id }, OneToOneMessage::Abort) =
        (state, &message)
    else {
        return Err(mismatch("BobProcessesAbort", &message));
    };

    let Some(remote) = ctx.remote_identity() else {
        warn!(instance = %ctx.instance(), "abort without a remote identity");
        return Ok(OneToOneState::Cancelled);
    };
    if remote != contact {
        debug!(instance = %ctx.instance(), %remote, %contact, "abort from an unexpected identity");
        return Ok(state);
    }

    ctx.reset_one_to_one_status(contact, false);
    delete_dialog(ctx, dialog_id)?;

    Ok(OneToOneState::Finished)
}

pub(super) fn contact_upgraded(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (contact, dialog_id) = match state {
        OneToOneState::InvitationSent { contact, dialog_id }
        | OneToOneState::InvitationReceived { contact, dialog_id } => (contact, dialog_id),
        _ => return Err(mismatch("ContactUpgraded", &message)),
    };

    // Replays can be stale: the contact may have been downgraded since.
    if !ctx.is_one_to_one(&contact)? {
        return Ok(state);
    }

    delete_dialog(ctx, dialog_id)?;
    Ok(OneToOneState::Finished)
}

pub(super) fn process_propagated_invitation(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    _: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let OneToOneMessage::PropagateOneToOneInvitation { contact } = message else {
        return Err(mismatch("ProcessPropagatedInvitation", &message));
    };

    if !ctx.is_contact(&contact)? {
        return Ok(OneToOneState::Finished);
    }

    let dialog_id = ctx.new_dialog_id();
    ctx.post_dialog(
        dialog_id,
        DialogContent::Show(Dialog::OneToOneInvitationSent { contact }),
        kind::DIALOG_INVITATION_SENT,
    )?;
    ctx.park(contact, kind::CONTACT_UPGRADED_TO_ONE_TO_ONE)?;

    Ok(OneToOneState::InvitationSent { contact, dialog_id })
}

pub(super) fn process_propagated_response(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (
        OneToOneState::InvitationReceived { contact, dialog_id },
        OneToOneMessage::PropagateOneToOneResponse { accepted },
    ) = (state, &message)
    else {
        return Err(mismatch("ProcessPropagatedResponse", &message));
    };

    ctx.reset_one_to_one_status(contact, *accepted);
    delete_dialog(ctx, dialog_id)?;

    Ok(OneToOneState::Finished)
}

pub(super) fn process_propagated_abort(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    state: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let (OneToOneState::InvitationSent { contact, dialog_id }, OneToOneMessage::PropagateAbort) =
        (state, &message)
    else {
        return Err(mismatch("ProcessPropagatedAbort", &message));
    };

    ctx.reset_one_to_one_status(contact, false);
    delete_dialog(ctx, dialog_id)?;

    Ok(OneToOneState::Finished)
}

pub(super) fn alice_processes_unexpected_bob_response(
    protocol: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    _: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let OneToOneMessage::OneToOneResponse { accepted: contact_considers_us } = message else {
        return Err(mismatch("AliceProcessesUnexpectedBobResponse", &message));
    };
    let Some(contact) = ctx.remote_identity() else {
        warn!(instance = %ctx.instance(), "response without a remote identity");
        return Ok(OneToOneState::Cancelled);
    };

    let we_consider_contact = ctx.is_one_to_one(&contact)?;
    if contact_considers_us == we_consider_contact {
        return Ok(OneToOneState::Finished);
    }

    debug!(
        instance = %ctx.instance(),
        %contact,
        contact_considers_us,
        we_consider_contact,
        "one-to-one status disagreement"
    );
    match protocol.config().sync_policy {
        StatusSyncPolicy::PreferDowngrade => {
            ctx.reset_one_to_one_status(contact, false);
            let downgrade = ctx.initial_message_for(&StartRequest::DowngradeOneToOne { contact })?;
            ctx.post(downgrade)?;
        },
        StatusSyncPolicy::PreferUpgrade if contact_considers_us => {
            ctx.reset_one_to_one_status(contact, true);
        },
        StatusSyncPolicy::PreferUpgrade => send_sync_request(ctx, contact, true)?,
    }

    Ok(OneToOneState::Finished)
}

pub(super) fn alice_sends_status_sync_requests(
    _: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    _: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let OneToOneMessage::InitialOneToOneStatusSyncRequest { contacts } = message else {
        return Err(mismatch("AliceSendsStatusSyncRequests", &message));
    };

    for contact in contacts {
        if let Err(err) = request_status_sync(ctx, contact) {
            warn!(instance = %ctx.instance(), %contact, %err, "status sync request failed");
        }
    }

    Ok(OneToOneState::Finished)
}

fn request_status_sync(ctx: &mut StepContext<'_>, contact: Identity) -> Result<(), StepError> {
    let one_to_one = ctx.is_one_to_one(&contact)?;
    ctx.send(
        SendChannel::contact(contact),
        kind::ONE_TO_ONE_STATUS_SYNC_REQUEST,
        vec![Encoded::encode(&one_to_one)?],
    )?;
    Ok(())
}

pub(super) fn bob_processes_status_sync_request(
    protocol: &OneToOneInvitationProtocol,
    ctx: &mut StepContext<'_>,
    _: OneToOneState,
    message: OneToOneMessage,
) -> Step {
    let OneToOneMessage::OneToOneStatusSyncRequest { alice_considers_bob_one_to_one } = message
    else {
        return Err(mismatch("BobProcessesStatusSyncRequest", &message));
    };
    let Some(contact) = ctx.remote_identity() else {
        warn!(instance = %ctx.instance(), "sync request without a remote identity");
        return Ok(OneToOneState::Cancelled);
    };

    let bob_considers_alice_one_to_one = ctx.is_one_to_one(&contact)?;
    let policy = protocol.config().sync_policy;
    match (alice_considers_bob_one_to_one, bob_considers_alice_one_to_one) {
        (true, true) | (false, false) => {},
        (false, true) => match policy {
            StatusSyncPolicy::PreferDowngrade => ctx.reset_one_to_one_status(contact, false),
            StatusSyncPolicy::PreferUpgrade => send_sync_request(ctx, contact, true)?,
        },
        (true, false) => {
            if policy == StatusSyncPolicy::PreferUpgrade || has_pending_invitation(ctx, &contact)? {
                ctx.reset_one_to_one_status(contact, true);
            } else {
                send_sync_request(ctx, contact, false)?;
            }
        },
    }

    Ok(OneToOneState::Finished)
}
