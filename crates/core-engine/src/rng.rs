//! Deterministic random streams exposed through the store.
//!
//! Two xoroshiro128+ streams seeded from hashed labels: `rand` in `[0, 1)`
//! and `rrand` in `[-1, 1)`. Both advance once per parsed command (so
//! command timing, not frame timing, decides consumption) and publish their
//! values at `random.rand` / `random.rrand`. A rollback restores the state
//! from before the last advance — used around operations that must not
//! consume randomness, such as loading a task file.

use std::sync::Arc;

use core_runtime::{CommandResult, DomainModule, Prng};
use parking_lot::Mutex;

use crate::engine::Engine;

pub mod keys {
    pub const RAND: &str = "random.rand";
    pub const RRAND: &str = "random.rrand";
}

struct RngState {
    rand: Prng,
    rrand: Prng,
    snapshot: (Prng, Prng),
}

pub struct RngModule {
    state: Arc<Mutex<RngState>>,
}

impl RngModule {
    pub fn new() -> Self {
        let rand = Prng::from_label("rand");
        let rrand = Prng::from_label("rrand");
        Self {
            state: Arc::new(Mutex::new(RngState {
                rand,
                rrand,
                snapshot: (rand, rrand),
            })),
        }
    }

    /// Advances both streams and publishes their values. Called from the
    /// dispatcher's pre-parse hook, which keeps timing deterministic for a
    /// given command trace.
    pub fn advance(&self, engine: &Engine) {
        let mut state = self.state.lock();
        state.snapshot = (state.rand, state.rrand);
        let rand = state.rand.next_f64();
        let rrand = state.rrand.next_f64() * 2.0 - 1.0;
        let doc = engine.global();
        doc.set(keys::RAND, rand);
        doc.set(keys::RRAND, rrand);
    }

    /// Restores the streams to their state before the last advance.
    pub fn rollback(&self) {
        let mut state = self.state.lock();
        let (rand, rrand) = state.snapshot;
        state.rand = rand;
        state.rrand = rrand;
    }
}

impl Default for RngModule {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainModule<Engine> for RngModule {
    fn name(&self) -> &'static str {
        "rng"
    }

    fn update(&self, _engine: &Engine) -> CommandResult {
        // Streams advance per parsed command, not per frame.
        Ok(())
    }
}
