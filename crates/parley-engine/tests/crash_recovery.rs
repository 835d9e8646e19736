//! Durability across restarts with the Redb backend.

mod support;

use parley_core::{
    Protocol, StartRequest,
    one_to_one::{OneToOneInvitationProtocol, kind, state_kind},
};
use parley_engine::{
    EngineAction, EngineConfig, EngineDriver, EngineEvent, InstanceView, RedbStorage, Storage,
};
use parley_proto::{
    DialogResponse, Encoded, InstanceId, MessageEnvelope, ReceptionInfo, SendChannel,
};
use support::{SharedBook, SharedChannel, engine, identity};
use tempfile::TempDir;

#[test]
fn parked_invitation_survives_restart_and_resolves_on_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("parley.redb");
    let (alice, bob) = (identity(1), identity(2));
    let book = SharedBook::default().with_contact(bob, false);

    let key = {
        let storage = RedbStorage::open(&path).unwrap();
        let mut driver = EngineDriver::new(engine(
            storage,
            &book,
            &SharedChannel::default(),
            EngineConfig::default(),
        ));
        driver
            .process_event(EngineEvent::Start {
                owned: alice,
                request: StartRequest::OneToOneInvitation { contact: bob },
            })
            .unwrap();
        let records = driver.engine().storage().list_waiting().unwrap();
        assert_eq!(records.len(), 1);
        records[0].instance_key()
    };

    // Bob accepted on another path while this device was down.
    book.set(bob, true);

    let storage = RedbStorage::open(&path).unwrap();
    let stored = storage.load_instance(&key).unwrap().unwrap();
    assert_eq!(stored.state.kind, state_kind::INVITATION_SENT);
    assert_eq!(stored.revision, 1);

    let mut driver = EngineDriver::new(engine(
        storage.clone(),
        &book,
        &SharedChannel::default(),
        EngineConfig::default(),
    ));
    let actions = driver.process_event(EngineEvent::Startup).unwrap();

    assert!(actions.contains(&EngineAction::InstanceFinished {
        key,
        terminal: state_kind::FINISHED
    }));
    assert!(storage.list_instances().unwrap().is_empty());
    assert!(storage.list_waiting().unwrap().is_empty());
}

#[test]
fn unmet_precondition_keeps_the_record_across_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("parley.redb");
    let (alice, bob) = (identity(1), identity(2));
    let book = SharedBook::default().with_contact(bob, false);

    {
        let storage = RedbStorage::open(&path).unwrap();
        let mut engine =
            engine(storage, &book, &SharedChannel::default(), EngineConfig::default());
        engine.start(alice, &StartRequest::OneToOneInvitation { contact: bob }).unwrap();
    }

    for _ in 0..2 {
        let storage = RedbStorage::open(&path).unwrap();
        let mut driver = EngineDriver::new(engine(
            storage.clone(),
            &book,
            &SharedChannel::default(),
            EngineConfig::default(),
        ));
        let actions = driver.process_event(EngineEvent::Startup).unwrap();
        assert!(actions.is_empty());

        let records = storage.waiting_for(&alice, &bob).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pending, kind::CONTACT_UPGRADED_TO_ONE_TO_ONE);
    }
}

#[test]
fn received_invitation_is_answerable_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("parley.redb");
    let (bob, alice) = (identity(2), identity(1));
    let book = SharedBook::default().with_contact(alice, false);
    let channel = SharedChannel::default();

    let envelope = MessageEnvelope::new(
        OneToOneInvitationProtocol::ID,
        InstanceId::from_bytes([7; 32]),
        kind::ONE_TO_ONE_INVITATION,
    )
    .received_on(ReceptionInfo::from_contact(alice));

    let execution = {
        let storage = RedbStorage::open(&path).unwrap();
        let mut engine = engine(storage, &book, &channel, EngineConfig::default());
        engine.try_execute(bob, &envelope).unwrap()
    };
    let dialog_id = execution
        .deliveries
        .iter()
        .find_map(|p| match &p.message.channel {
            SendChannel::UserInterface { dialog_id, .. } => Some(*dialog_id),
            _ => None,
        })
        .unwrap();

    let storage = RedbStorage::open(&path).unwrap();
    let mut engine = engine(storage.clone(), &book, &channel, EngineConfig::default());
    assert!(matches!(
        engine.load_or_initial(&execution.key).unwrap(),
        InstanceView::Stored(ref stored) if stored.state.kind == state_kind::INVITATION_RECEIVED
    ));

    let accept = MessageEnvelope::new(
        execution.key.protocol,
        execution.key.instance,
        kind::DIALOG_ACCEPT_ONE_TO_ONE_INVITATION,
    )
    .answering(DialogResponse {
        dialog_id,
        response: Encoded::encode(&true).unwrap(),
    })
    .received_on(ReceptionInfo::local());
    engine.try_execute(bob, &accept).unwrap();

    assert_eq!(book.get(&alice), Some(true));
    assert!(storage.list_instances().unwrap().is_empty());
}
