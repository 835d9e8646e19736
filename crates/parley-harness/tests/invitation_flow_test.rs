//! End-to-end invitation flows between simulated devices.

use parley_core::StartRequest;
use parley_harness::{DeviceId, InvariantRegistry, ShownDialog, SimWorld};
use parley_proto::{Dialog, DialogContent, DialogId, Identity, SendChannel};

fn alice() -> Identity {
    Identity::from_bytes([0xA1; 32])
}

fn bob() -> Identity {
    Identity::from_bytes([0xB0; 32])
}

/// Alice and Bob with one device each, contacts but not one-to-one.
fn pair(seed: u64) -> (SimWorld, DeviceId, DeviceId) {
    let mut world = SimWorld::new(seed).with_invariants(InvariantRegistry::strict());
    let a = world.add_device(alice());
    let b = world.add_device(bob());
    world.befriend(alice(), bob());
    (world, a, b)
}

fn only_dialog(world: &SimWorld, device: DeviceId) -> (DialogId, ShownDialog) {
    let dialogs = world.device(device).unwrap().dialogs();
    assert_eq!(dialogs.len(), 1, "expected exactly one dialog on {device}");
    let (id, shown) = dialogs.iter().next().unwrap();
    (*id, shown.clone())
}

fn status(world: &SimWorld, device: DeviceId, contact: Identity) -> Option<bool> {
    world.device(device).unwrap().one_to_one(&contact)
}

#[test]
fn accepted_invitation_upgrades_both_sides() {
    let (mut world, a, b) = pair(1);

    world.start(a, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    let (_, sent) = only_dialog(&world, a);
    assert_eq!(sent.dialog, Dialog::OneToOneInvitationSent { contact: bob() });
    assert_eq!(world.in_flight().len(), 1);

    world.deliver_all();
    let (prompt, received) = only_dialog(&world, b);
    assert_eq!(received.dialog, Dialog::OneToOneInvitationReceived { contact: alice() });
    assert_eq!(status(&world, b, alice()), Some(false));

    world.answer(b, prompt, true).unwrap();
    world.deliver_all();

    assert_eq!(status(&world, a, bob()), Some(true));
    assert_eq!(status(&world, b, alice()), Some(true));
    assert!(world.is_settled());
    assert_eq!(world.device(a).unwrap().finished().len(), 1);
}

#[test]
fn declined_invitation_leaves_both_sides_unchanged() {
    let (mut world, a, b) = pair(2);

    world.start(a, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();
    let (prompt, _) = only_dialog(&world, b);
    world.answer(b, prompt, false).unwrap();
    world.deliver_all();

    assert_eq!(status(&world, a, bob()), Some(false));
    assert_eq!(status(&world, b, alice()), Some(false));
    assert!(world.is_settled());
}

#[test]
fn abort_cleans_up_both_sides() {
    let (mut world, a, b) = pair(3);

    world.start(a, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();
    assert_eq!(world.device(b).unwrap().dialogs().len(), 1);

    // Dismissing the prompt without cancelling keeps the invitation alive.
    let (prompt, _) = only_dialog(&world, a);
    world.answer(a, prompt, false).unwrap();
    assert_eq!(world.device(a).unwrap().dialogs().len(), 1);
    assert!(world.in_flight().is_empty());

    world.answer(a, prompt, true).unwrap();
    assert!(world.device(a).unwrap().dialogs().is_empty());
    assert_eq!(world.device(a).unwrap().storage().waiting_count(), 0);

    world.deliver_all();
    assert_eq!(status(&world, a, bob()), Some(false));
    assert_eq!(status(&world, b, alice()), Some(false));
    assert!(world.is_settled());
}

#[test]
fn sibling_devices_converge_on_one_answer() {
    let mut world = SimWorld::new(4).with_invariants(InvariantRegistry::strict());
    let a1 = world.add_device(alice());
    let a2 = world.add_device(alice());
    let b1 = world.add_device(bob());
    let b2 = world.add_device(bob());
    world.befriend(alice(), bob());

    world.start(a1, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();

    let (_, mirrored) = only_dialog(&world, a2);
    assert_eq!(mirrored.dialog, Dialog::OneToOneInvitationSent { contact: bob() });
    only_dialog(&world, b1);
    let (prompt, _) = only_dialog(&world, b2);

    world.answer(b2, prompt, true).unwrap();
    world.deliver_all();

    for device in [a1, a2] {
        assert_eq!(status(&world, device, bob()), Some(true), "{device}");
    }
    for device in [b1, b2] {
        assert_eq!(status(&world, device, alice()), Some(true), "{device}");
    }
    assert!(world.is_settled());
}

#[test]
fn sibling_cancel_takes_down_the_mirrored_prompt() {
    let mut world = SimWorld::new(5).with_invariants(InvariantRegistry::strict());
    let a1 = world.add_device(alice());
    let a2 = world.add_device(alice());
    let b = world.add_device(bob());
    world.befriend(alice(), bob());

    world.start(a1, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();
    let (prompt, _) = only_dialog(&world, a1);

    world.answer(a1, prompt, true).unwrap();
    world.deliver_all();

    assert!(world.device(a2).unwrap().dialogs().is_empty());
    assert!(world.device(b).unwrap().dialogs().is_empty());
    assert!(world.is_settled());
}

#[test]
fn answering_a_settled_prompt_dismisses_it() {
    let mut world = SimWorld::new(6).with_invariants(InvariantRegistry::strict());
    let a = world.add_device(alice());
    let b1 = world.add_device(bob());
    let b2 = world.add_device(bob());
    world.befriend(alice(), bob());

    world.start(a, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();
    let (stale_id, stale) = only_dialog(&world, b1);
    let (prompt, _) = only_dialog(&world, b2);

    world.answer(b2, prompt, true).unwrap();
    world.deliver_all();
    assert!(world.device(b1).unwrap().dialogs().is_empty());

    // The user on b1 clicked before the prompt went away.
    world.answer_with(b1, stale_id, &stale, false).unwrap();

    let accepted = world.device(b1).unwrap().channel().accepted();
    let (_, last) = accepted.last().unwrap();
    assert_eq!(
        last.channel,
        SendChannel::UserInterface { dialog_id: stale_id, content: DialogContent::Delete }
    );
    assert!(world.in_flight().is_empty());
    assert_eq!(status(&world, b1, alice()), Some(true));
    assert!(world.is_settled());
}

#[test]
fn restart_while_waiting_keeps_the_invitation() {
    let (mut world, a, b) = pair(7);

    world.start(a, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();

    world.restart(a).unwrap();
    assert_eq!(world.device(a).unwrap().storage().instance_count(), 1);
    assert_eq!(world.device(a).unwrap().storage().waiting_count(), 1);
    assert!(world.in_flight().is_empty());

    let (prompt, _) = only_dialog(&world, b);
    world.answer(b, prompt, true).unwrap();
    world.deliver_all();

    assert_eq!(status(&world, a, bob()), Some(true));
    assert!(world.is_settled());
}

#[test]
fn invitee_forgetting_the_inviter_ends_their_run_silently() {
    let (mut world, a, b) = pair(8);

    world.start(a, StartRequest::OneToOneInvitation { contact: bob() }).unwrap();
    world.deliver_all();
    let (prompt, _) = only_dialog(&world, b);

    world.forget(bob(), &alice());
    world.answer(b, prompt, true).unwrap();

    assert!(world.in_flight().is_empty());
    assert!(world.device(b).unwrap().dialogs().is_empty());
    assert_eq!(world.device(b).unwrap().storage().instance_count(), 0);
    // Alice is still waiting until she gives up.
    assert_eq!(world.device(a).unwrap().storage().instance_count(), 1);
}
