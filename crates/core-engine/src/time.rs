//! Simulation time: real and simulated keepers, time locks, fixed-dt.
//!
//! Two keepers run side by side. RealTime tracks the monotonic wall clock;
//! SimulationTime advances by RealTime's delta (or by a fixed delta when
//! configured) unless a halt was requested or any named time lock is held,
//! in which case the simulated delta is zero and the frame's scene update is
//! skipped. Exposed store keys: `runtime.t[,_ms]`, `runtime.dt[,_ms]`,
//! `time.t[,_ms]`, `time.dt[,_ms]`, `frameCount`.

use std::collections::HashSet;
use std::time::Instant;

use core_runtime::{CommandResult, DomainModule, EngineError, FuncTree};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::engine::Engine;

pub mod keys {
    pub const RUNTIME_T: &str = "runtime.t";
    pub const RUNTIME_DT: &str = "runtime.dt";
    pub const RUNTIME_T_MS: &str = "runtime.t_ms";
    pub const RUNTIME_DT_MS: &str = "runtime.dt_ms";
    pub const TIME_T: &str = "time.t";
    pub const TIME_DT: &str = "time.dt";
    pub const TIME_T_MS: &str = "time.t_ms";
    pub const TIME_DT_MS: &str = "time.dt_ms";
    pub const FRAME_COUNT: &str = "frameCount";
}

/// Monotonic keeper; `update` captures the elapsed delta since last call.
struct TimeKeeper {
    start: Instant,
    last_ms: u64,
    t_ms: u64,
    dt_ms: u64,
}

impl TimeKeeper {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: 0,
            t_ms: 0,
            dt_ms: 0,
        }
    }

    fn update(&mut self) {
        let now_ms = self.start.elapsed().as_millis() as u64;
        self.dt_ms = now_ms - self.last_ms;
        self.last_ms = now_ms;
        self.t_ms = now_ms;
    }
}

/// Accumulating keeper fed by externally-chosen deltas.
struct SimKeeper {
    t_ms: u64,
    dt_ms: u64,
}

struct TimeState {
    real: TimeKeeper,
    sim: SimKeeper,
    fixed_dt_ms: u64,
    halt_this_frame: bool,
    locks: HashSet<String>,
    frame_count: u64,
    progressed: bool,
}

pub struct TimeModule {
    state: Arc<Mutex<TimeState>>,
}

impl TimeModule {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TimeState {
                real: TimeKeeper::new(),
                sim: SimKeeper { t_ms: 0, dt_ms: 0 },
                fixed_dt_ms: 0,
                halt_this_frame: false,
                locks: HashSet::new(),
                frame_count: 0,
                progressed: false,
            })),
        }
    }

    /// Whether the simulation advanced in the most recent update; scene and
    /// pair updates are skipped otherwise.
    pub fn simulation_progressed(&self) -> bool {
        self.state.lock().progressed
    }

    pub fn register_commands(&self, tree: &mut FuncTree<Engine>) {
        let state = self.state.clone();
        tree.register_in(
            "time",
            "time halt-once",
            "Hold simulation time for one frame",
            move |_, _| {
                state.lock().halt_this_frame = true;
                Ok(())
            },
        );
        let state = self.state.clone();
        tree.register_in(
            "time",
            "time lock",
            "Hold simulation time under a named lock: time lock <name>",
            move |_, args| {
                let [name] = args else {
                    return Err(EngineError::TooFewArgs("time lock".into()));
                };
                state.lock().locks.insert(name.clone());
                Ok(())
            },
        );
        let state = self.state.clone();
        tree.register_in(
            "time",
            "time unlock",
            "Release a named time lock: time unlock <name>",
            move |_, args| {
                let [name] = args else {
                    return Err(EngineError::TooFewArgs("time unlock".into()));
                };
                if !state.lock().locks.remove(name) {
                    return Err(EngineError::UnknownArg(format!("time lock `{name}`")));
                }
                Ok(())
            },
        );
        let state = self.state.clone();
        tree.register_in(
            "time",
            "time master-unlock",
            "Release every time lock",
            move |_, _| {
                state.lock().locks.clear();
                Ok(())
            },
        );
        let state = self.state.clone();
        tree.register_in(
            "time",
            "time fixed-dt",
            "Fix the simulated delta: time fixed-dt <ms> (0 restores real time)",
            move |_, args| {
                let [ms] = args else {
                    return Err(EngineError::TooFewArgs("time fixed-dt".into()));
                };
                let ms: u64 = ms.parse().map_err(|_| EngineError::InvalidArg {
                    arg: ms.clone(),
                    reason: "expected milliseconds".to_string(),
                })?;
                state.lock().fixed_dt_ms = ms;
                Ok(())
            },
        );
    }
}

impl Default for TimeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainModule<Engine> for TimeModule {
    fn name(&self) -> &'static str {
        "time"
    }

    fn update(&self, engine: &Engine) -> CommandResult {
        let doc = engine.global();
        let mut state = self.state.lock();
        state.real.update();
        doc.set(keys::RUNTIME_DT, state.real.dt_ms as f64 / 1000.0);
        doc.set(keys::RUNTIME_T, state.real.t_ms as f64 / 1000.0);
        doc.set(keys::RUNTIME_DT_MS, state.real.dt_ms);
        doc.set(keys::RUNTIME_T_MS, state.real.t_ms);

        let held = state.halt_this_frame || !state.locks.is_empty();
        state.halt_this_frame = false;
        state.progressed = !held;
        if held {
            state.sim.dt_ms = 0;
            doc.set(keys::TIME_DT, 0.0);
            doc.set(keys::TIME_DT_MS, 0u64);
            return Ok(());
        }

        let dt = if state.fixed_dt_ms > 0 {
            state.fixed_dt_ms
        } else {
            state.real.dt_ms
        };
        state.sim.dt_ms = dt;
        state.sim.t_ms += dt;
        doc.set(keys::TIME_DT, dt as f64 / 1000.0);
        doc.set(keys::TIME_T, state.sim.t_ms as f64 / 1000.0);
        doc.set(keys::TIME_DT_MS, dt);
        doc.set(keys::TIME_T_MS, state.sim.t_ms);

        doc.set(keys::FRAME_COUNT, state.frame_count);
        state.frame_count += 1;
        Ok(())
    }
}
