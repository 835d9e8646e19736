//! Fuzz target for MessageEnvelope::from_bytes
//!
//! Arbitrary bytes must decode to an envelope or an error, never a panic.
//! Whatever decodes must survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::MessageEnvelope;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = MessageEnvelope::from_bytes(data) else {
        return;
    };

    let bytes = envelope.to_bytes().expect("decoded envelope must re-encode");
    let again = MessageEnvelope::from_bytes(&bytes).expect("re-encoded envelope must decode");
    assert_eq!(envelope, again);
});
