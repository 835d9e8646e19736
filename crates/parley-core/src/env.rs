//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). The
//! harness provides a seeded implementation; production uses the OS clock
//! and OS entropy.

use std::time::Duration;

use parley_proto::{DialogId, InstanceId};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Seconds since the Unix epoch, used to stamp persisted records.
    fn wall_clock_secs(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Object-safe view of an environment's randomness.
///
/// Steps only ever see this: they need fresh identifiers, never the clock.
pub trait Prng {
    /// Fills the provided buffer with random bytes.
    fn fill(&self, buffer: &mut [u8]);

    /// Fresh identifier for a new protocol run.
    fn instance_id(&self) -> InstanceId {
        let mut bytes = [0u8; InstanceId::LEN];
        self.fill(&mut bytes);
        InstanceId::from_bytes(bytes)
    }

    /// Fresh identifier for a new prompt.
    fn dialog_id(&self) -> DialogId {
        let mut bytes = [0u8; 16];
        self.fill(&mut bytes);
        DialogId::from_random_bytes(bytes)
    }
}

impl<E: Environment> Prng for E {
    fn fill(&self, buffer: &mut [u8]) {
        self.random_bytes(buffer);
    }
}
