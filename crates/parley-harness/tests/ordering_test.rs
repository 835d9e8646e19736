//! Crossed invitations, reordering, duplication and replay.

use parley_core::StartRequest;
use parley_harness::{DeviceId, InvariantRegistry, SimWorld};
use parley_proto::{DialogId, Identity};
use proptest::prelude::*;

fn alice() -> Identity {
    Identity::from_bytes([0xA1; 32])
}

fn bob() -> Identity {
    Identity::from_bytes([0xB0; 32])
}

fn pair(seed: u64) -> (SimWorld, DeviceId, DeviceId) {
    let mut world = SimWorld::new(seed).with_invariants(InvariantRegistry::strict());
    let a = world.add_device(alice());
    let b = world.add_device(bob());
    world.befriend(alice(), bob());
    (world, a, b)
}

fn invite(world: &mut SimWorld, from: DeviceId, contact: Identity) {
    world.start(from, StartRequest::OneToOneInvitation { contact }).unwrap();
}

fn first_dialog(world: &SimWorld, device: DeviceId) -> DialogId {
    *world.device(device).unwrap().dialogs().keys().next().unwrap()
}

fn statuses(world: &SimWorld, a: DeviceId, b: DeviceId) -> (Option<bool>, Option<bool>) {
    (
        world.device(a).unwrap().one_to_one(&bob()),
        world.device(b).unwrap().one_to_one(&alice()),
    )
}

#[test]
fn crossed_invitations_upgrade_without_prompting() {
    let (mut world, a, b) = pair(11);
    invite(&mut world, a, bob());
    invite(&mut world, b, alice());

    world.deliver_all();

    assert_eq!(statuses(&world, a, b), (Some(true), Some(true)));
    assert!(world.is_settled());
}

#[test]
fn abort_overtaking_its_invitation_is_dropped() {
    let (mut world, a, b) = pair(12);
    invite(&mut world, a, bob());
    let prompt = first_dialog(&world, a);
    world.answer(a, prompt, true).unwrap();
    assert_eq!(world.in_flight().len(), 2);

    // The abort arrives first and finds nothing to cancel.
    world.deliver_at(1).unwrap();
    assert_eq!(world.device(b).unwrap().storage().instance_count(), 0);

    // The invitation still prompts Bob; accepting it is repaired by the
    // status disagreement handling.
    world.deliver_next();
    let prompt = first_dialog(&world, b);
    world.answer(b, prompt, true).unwrap();
    world.deliver_all();

    assert_eq!(statuses(&world, a, b), (Some(false), Some(false)));
    assert!(world.is_settled());
}

#[test]
fn lost_response_leaves_the_inviter_waiting() {
    let (mut world, a, b) = pair(13);
    invite(&mut world, a, bob());
    world.deliver_all();
    let prompt = first_dialog(&world, b);
    world.answer(b, prompt, true).unwrap();

    world.drop_at(0).unwrap();

    assert_eq!(statuses(&world, a, b), (Some(false), Some(true)));
    assert_eq!(world.device(a).unwrap().storage().instance_count(), 1);
    assert!(!world.is_settled());
}

#[test]
fn replaying_a_finished_run_changes_nothing() {
    let (mut world, a, b) = pair(14);
    invite(&mut world, a, bob());
    world.deliver_all();
    let prompt = first_dialog(&world, b);
    world.answer(b, prompt, true).unwrap();
    world.deliver_all();
    assert!(world.is_settled());

    world.replay_delivered();
    world.deliver_all();

    assert_eq!(statuses(&world, a, b), (Some(true), Some(true)));
    assert!(world.is_settled());
}

#[test]
fn duplicate_invitation_after_a_decline_is_dropped() {
    let (mut world, a, b) = pair(15);
    invite(&mut world, a, bob());
    world.duplicate(0).unwrap();
    world.deliver_next();
    let prompt = first_dialog(&world, b);
    world.answer(b, prompt, false).unwrap();

    // The second copy reaches Bob after the decline closed the instance.
    world.deliver_all();

    assert!(world.device(b).unwrap().dialogs().is_empty(), "declined invitation prompted again");
    assert_eq!(statuses(&world, a, b), (Some(false), Some(false)));
    assert!(world.is_settled());
}

#[test]
fn replaying_a_declined_run_changes_nothing() {
    let (mut world, a, b) = pair(16);
    invite(&mut world, a, bob());
    world.deliver_all();
    let prompt = first_dialog(&world, b);
    world.answer(b, prompt, false).unwrap();
    world.deliver_all();
    assert!(world.is_settled());

    world.replay_delivered();
    world.deliver_all();

    assert_eq!(statuses(&world, a, b), (Some(false), Some(false)));
    assert!(world.is_settled());
}

#[test]
fn same_seed_same_outcome() {
    let run = |seed| {
        let (mut world, a, b) = pair(seed);
        invite(&mut world, a, bob());
        invite(&mut world, b, alice());
        let deliveries = world.deliver_all_random();
        (deliveries, statuses(&world, a, b))
    };
    assert_eq!(run(99), run(99));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn crossed_invitations_converge_in_any_order(seed in any::<u64>()) {
        let (mut world, a, b) = pair(seed);
        invite(&mut world, a, bob());
        invite(&mut world, b, alice());

        world.deliver_all_random();

        prop_assert_eq!(statuses(&world, a, b), (Some(true), Some(true)));
        prop_assert!(world.is_settled());
    }

    #[test]
    fn duplicated_messages_do_not_change_the_outcome(
        seed in any::<u64>(),
        accept in any::<bool>(),
        duplicates in prop::collection::vec(any::<bool>(), 0..12),
    ) {
        let (mut world, a, b) = pair(seed);
        let mut duplicates = duplicates.into_iter();
        let mut deliver = |world: &mut SimWorld| {
            while !world.in_flight().is_empty() {
                if duplicates.next() == Some(true) {
                    world.duplicate(0).unwrap();
                }
                world.deliver_next();
            }
        };

        invite(&mut world, a, bob());
        deliver(&mut world);
        let prompt = first_dialog(&world, b);
        world.answer(b, prompt, accept).unwrap();
        deliver(&mut world);

        prop_assert_eq!(statuses(&world, a, b), (Some(accept), Some(accept)));
        prop_assert!(world.is_settled());
    }

    #[test]
    fn sibling_devices_converge_in_any_order(seed in any::<u64>()) {
        let mut world = SimWorld::new(seed).with_invariants(InvariantRegistry::strict());
        let a1 = world.add_device(alice());
        let a2 = world.add_device(alice());
        let b1 = world.add_device(bob());
        world.befriend(alice(), bob());

        invite(&mut world, a1, bob());
        world.deliver_all_random();
        let prompt = first_dialog(&world, b1);
        world.answer(b1, prompt, true).unwrap();
        world.deliver_all_random();

        prop_assert_eq!(world.device(a1).unwrap().one_to_one(&bob()), Some(true));
        prop_assert_eq!(world.device(a2).unwrap().one_to_one(&bob()), Some(true));
        prop_assert_eq!(world.device(b1).unwrap().one_to_one(&alice()), Some(true));
        prop_assert!(world.is_settled());
    }
}
