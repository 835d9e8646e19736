//! Simulated environment: seeded randomness and a virtual clock.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Unix time the virtual clock starts at.
pub const SIM_EPOCH_SECS: u64 = 1_700_000_000;

/// Deterministic environment.
///
/// Clones share both the RNG and the clock. [`SimEnv::fork`] gives a device
/// its own RNG stream on the shared clock, so ids differ per device but the
/// whole world stays reproducible from one seed.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    clock: Arc<Mutex<Duration>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            clock: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Fresh RNG stream on the same clock.
    #[must_use]
    pub fn fork(&self, seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        #[allow(clippy::expect_used)]
        let mut clock = self.clock.lock().expect("clock mutex poisoned");
        *clock += by;
    }
}

impl Environment for SimEnv {
    type Instant = Duration;

    #[allow(clippy::expect_used)]
    fn now(&self) -> Duration {
        *self.clock.lock().expect("clock mutex poisoned")
    }

    fn wall_clock_secs(&self) -> u64 {
        SIM_EPOCH_SECS + self.now().as_secs()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("rng mutex poisoned").fill_bytes(buffer);
    }
}
