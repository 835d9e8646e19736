//! Fuzz target for hostile inbound messages
//!
//! Feeds arbitrary envelopes (known and unknown kinds, garbage inputs,
//! spoofed channels, stray dialog answers) into an engine that may already
//! hold a parked invitation.
//!
//! # Invariants
//!
//! - The engine NEVER panics on inbound data
//! - Every waiting record still belongs to a stored instance
//! - No stored instance is in a terminal state

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{
    one_to_one::{self, state_kind, InvitationConfig, OneToOneInvitationProtocol},
    DefaultProtocolStarter, Delegates, Protocol, StartRequest,
};
use parley_engine::{Engine, EngineConfig, EngineDriver, EngineEvent, MemoryStorage, Storage};
use parley_harness::{SimChannel, SimEnv, SimIdentityBook};
use parley_proto::{
    DialogId, DialogResponse, Encoded, Identity, InstanceId, MessageEnvelope, MessageKind,
    ProtocolId, ReceptionInfo, StateKind,
};

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    /// Park an invitation to the contact before the hostile messages
    invite_first: bool,
    messages: Vec<HostileMessage>,
}

#[derive(Debug, Arbitrary)]
struct HostileMessage {
    /// Target the one-to-one protocol most of the time
    other_protocol: Option<u16>,
    /// Reuse the parked instance id, or pick a new one
    instance: Option<[u8; 32]>,
    kind: u8,
    inputs: Vec<Input>,
    dialog: Option<([u8; 16], Input)>,
    reception: Reception,
}

#[derive(Debug, Arbitrary)]
enum Input {
    Bool(bool),
    Identity([u8; 32]),
    Raw(Vec<u8>),
}

impl Input {
    fn encode(&self) -> Encoded {
        let encoded = match self {
            Input::Bool(value) => Encoded::encode(value),
            Input::Identity(bytes) => Encoded::encode(&Identity::from_bytes(*bytes)),
            Input::Raw(bytes) => return Encoded::from_raw(bytes.clone().into()),
        };
        encoded.expect("plain values must encode")
    }
}

#[derive(Debug, Arbitrary)]
enum Reception {
    None,
    Local,
    FromContact,
    FromStranger([u8; 32]),
    FromOwnedDevice,
}

const TERMINAL: [StateKind; 2] = [state_kind::FINISHED, state_kind::CANCELLED];

fn owned() -> Identity {
    Identity::from_bytes([0xA1; 32])
}

fn contact() -> Identity {
    Identity::from_bytes([0xB0; 32])
}

fuzz_target!(|scenario: Scenario| {
    let env = SimEnv::with_seed(scenario.seed);
    let storage = MemoryStorage::new();
    let book = SimIdentityBook::default();
    book.add_contact(contact());

    let delegates = Delegates::builder()
        .channel(SimChannel::default())
        .identity(book)
        .starter(DefaultProtocolStarter)
        .build()
        .expect("all delegates set");
    let registry = one_to_one::registry(InvitationConfig::default()).expect("valid registry");
    let engine = Engine::new(env, storage.clone(), registry, delegates, EngineConfig::default());
    let mut driver = EngineDriver::new(engine);

    let mut parked = InstanceId::from_bytes([0; 32]);
    if scenario.invite_first {
        let request = StartRequest::OneToOneInvitation { contact: contact() };
        let _ = driver.process_event(EngineEvent::Start { owned: owned(), request });
        if let Some((key, _)) = storage.list_instances().expect("memory storage").first() {
            parked = key.instance;
        }
    }

    for message in scenario.messages {
        let protocol = message.other_protocol.map_or(OneToOneInvitationProtocol::ID, ProtocolId);
        let instance = message.instance.map_or(parked, InstanceId::from_bytes);
        let kind = MessageKind(message.kind.into());
        let mut envelope = MessageEnvelope::new(protocol, instance, kind)
            .with_inputs(message.inputs.iter().map(Input::encode).collect());
        if let Some((dialog_id, response)) = &message.dialog {
            envelope = envelope.answering(DialogResponse {
                dialog_id: DialogId::from_random_bytes(*dialog_id),
                response: response.encode(),
            });
        }
        envelope = match message.reception {
            Reception::None => envelope,
            Reception::Local => envelope.received_on(ReceptionInfo::local()),
            Reception::FromContact => envelope.received_on(ReceptionInfo::from_contact(contact())),
            Reception::FromStranger(bytes) => {
                envelope.received_on(ReceptionInfo::from_contact(Identity::from_bytes(bytes)))
            },
            Reception::FromOwnedDevice => {
                envelope.received_on(ReceptionInfo::from_owned_device(owned()))
            },
        };

        let _ = driver.process_event(EngineEvent::MessageReceived { owned: owned(), envelope });

        let instances = storage.list_instances().expect("memory storage");
        for record in storage.list_waiting().expect("memory storage") {
            let key = record.instance_key();
            assert!(
                instances.iter().any(|(stored, _)| *stored == key),
                "waiting record outlived its instance {key}"
            );
        }
        for (key, stored) in &instances {
            assert!(
                !TERMINAL.contains(&stored.state.kind),
                "instance {key} stored in terminal state"
            );
            assert!(
                !storage.is_terminated(key).expect("memory storage"),
                "terminated instance {key} came back"
            );
        }
    }
});
