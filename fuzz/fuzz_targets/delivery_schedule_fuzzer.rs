//! Fuzz target for delivery schedules across devices
//!
//! Two identities with up to two devices each invite, answer, cancel,
//! sync and restart while the fuzzer reorders, duplicates and drops
//! messages on the wire. The world checks its invariants after every
//! event and panics on the first violation.
//!
//! # Invariants
//!
//! - No waiting record outlives its instance
//! - No terminal state is persisted
//! - No prompt outlives its instance
//! - No execution fails (nothing refuses a post)
//! - With nothing lost and every prompt answered, the world settles

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::StartRequest;
use parley_harness::{DeviceId, InvariantRegistry, SimWorld};
use parley_proto::Identity;

#[derive(Debug, Arbitrary)]
struct Schedule {
    seed: u64,
    alice_devices: bool,
    bob_devices: bool,
    operations: Vec<Operation>,
}

#[derive(Debug, Arbitrary)]
enum Operation {
    Invite { device: u8 },
    Answer { device: u8, dialog: u8, value: bool },
    Sync { device: u8 },
    Restart { device: u8 },
    DeliverNext,
    DeliverAt { index: u8 },
    Duplicate { index: u8 },
    Drop { index: u8 },
}

const MAX_ROUNDS: usize = 10_000;

fn alice() -> Identity {
    Identity::from_bytes([0xA1; 32])
}

fn bob() -> Identity {
    Identity::from_bytes([0xB0; 32])
}

fn pick(world: &SimWorld, device: u8) -> DeviceId {
    DeviceId(device as usize % world.devices().len())
}

fn peer(world: &SimWorld, device: DeviceId) -> Identity {
    let owned = world.device(device).expect("picked device exists").owned();
    if owned == alice() {
        bob()
    } else {
        alice()
    }
}

fn in_flight_index(world: &SimWorld, index: u8) -> Option<usize> {
    let len = world.in_flight().len();
    (len > 0).then(|| index as usize % len)
}

fuzz_target!(|schedule: Schedule| {
    let mut world = SimWorld::new(schedule.seed).with_invariants(InvariantRegistry::strict());
    world.add_device(alice());
    if schedule.alice_devices {
        world.add_device(alice());
    }
    world.add_device(bob());
    if schedule.bob_devices {
        world.add_device(bob());
    }
    world.befriend(alice(), bob());

    let mut lost = false;
    for operation in schedule.operations {
        match operation {
            Operation::Invite { device } => {
                let device = pick(&world, device);
                let contact = peer(&world, device);
                world
                    .start(device, StartRequest::OneToOneInvitation { contact })
                    .expect("picked device exists");
            },
            Operation::Answer { device, dialog, value } => {
                let device = pick(&world, device);
                let dialogs = world.device(device).expect("picked device exists").dialogs();
                if dialogs.is_empty() {
                    continue;
                }
                let dialog_id = *dialogs
                    .keys()
                    .nth(dialog as usize % dialogs.len())
                    .expect("index within bounds");
                world.answer(device, dialog_id, value).expect("dialog is shown");
            },
            Operation::Sync { device } => {
                let device = pick(&world, device);
                let contacts = BTreeSet::from([peer(&world, device)]);
                world
                    .start(device, StartRequest::OneToOneStatusSync { contacts })
                    .expect("picked device exists");
            },
            Operation::Restart { device } => {
                let device = pick(&world, device);
                world.restart(device).expect("picked device exists");
            },
            Operation::DeliverNext => {
                world.deliver_next();
            },
            Operation::DeliverAt { index } => {
                if let Some(index) = in_flight_index(&world, index) {
                    world.deliver_at(index).expect("index within bounds");
                }
            },
            Operation::Duplicate { index } => {
                if let Some(index) = in_flight_index(&world, index) {
                    world.duplicate(index).expect("index within bounds");
                }
            },
            Operation::Drop { index } => {
                if let Some(index) = in_flight_index(&world, index) {
                    world.drop_at(index).expect("index within bounds");
                    lost = true;
                }
            },
        }
    }

    if lost {
        return;
    }

    // Answer everything still on screen until the world goes quiet.
    for _ in 0..MAX_ROUNDS {
        world.deliver_all();
        let pending: Vec<_> = world
            .devices()
            .iter()
            .flat_map(|d| d.dialogs().keys().map(move |id| (d.id(), *id)))
            .collect();
        let Some((device, dialog_id)) = pending.first().copied() else {
            break;
        };
        world.answer(device, dialog_id, true).expect("dialog is shown");
    }
    world.deliver_all();
    assert!(world.is_settled(), "world did not settle");
});
