//! Periodic clock signals driven by simulation time.
//!
//! Each clock is keyed by its interval in milliseconds and owns a stable
//! cell at `clock.signal.<interval>ms`. On each frame the cell reads 1.0 iff
//! at least one whole interval elapsed since the last trigger; the trigger
//! mark then advances by the maximal number of whole intervals, so clocks
//! are drift-free without being tick-accurate. Active intervals persist
//! under `clock.active[]` and are re-read after a state reload.

use std::sync::Arc;

use core_document::{CellRef, MemberKind};
use core_runtime::{CommandResult, DomainModule, EngineError, FuncTree};
use parking_lot::Mutex;

use crate::engine::Engine;
use crate::time;

pub mod keys {
    pub const ACTIVE: &str = "clock.active";
    pub const SIGNAL_PREFIX: &str = "clock.signal";
}

fn signal_key(interval_ms: u64) -> String {
    format!("{}.{}ms", keys::SIGNAL_PREFIX, interval_ms)
}

struct ClockEntry {
    interval_ms: u64,
    last_trigger_ms: u64,
    cell: CellRef,
}

impl ClockEntry {
    fn update(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_trigger_ms) >= self.interval_ms {
            let intervals_passed = (now_ms - self.last_trigger_ms) / self.interval_ms;
            self.last_trigger_ms += intervals_passed * self.interval_ms;
            self.cell.set(1.0);
        } else {
            self.cell.set(0.0);
        }
    }
}

pub struct ClockModule {
    entries: Arc<Mutex<Vec<ClockEntry>>>,
}

impl ClockModule {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn register_commands(&self, tree: &mut FuncTree<Engine>) {
        let entries = self.entries.clone();
        tree.register_in(
            "rulesets",
            "ruleset add-clock",
            "Add a periodic clock signal: ruleset add-clock <interval_ms>",
            move |engine, args| {
                let [interval] = args else {
                    return Err(EngineError::TooFewArgs("ruleset add-clock".into()));
                };
                let interval_ms: u64 = interval.parse().map_err(|_| EngineError::InvalidArg {
                    arg: interval.clone(),
                    reason: "interval must be a positive integer".to_string(),
                })?;
                if interval_ms == 0 {
                    return Err(EngineError::InvalidArg {
                        arg: interval.clone(),
                        reason: "interval must be greater than 0".to_string(),
                    });
                }
                let mut entries = entries.lock();
                if entries.iter().any(|e| e.interval_ms == interval_ms) {
                    return Err(EngineError::UnknownArg(format!(
                        "clock with interval {interval_ms}ms already exists"
                    )));
                }
                let doc = engine.global();
                let slot = doc.member_size(keys::ACTIVE);
                doc.set(&format!("{}[{slot}]", keys::ACTIVE), interval_ms);
                let now_ms = doc.get(time::keys::TIME_T_MS, 0u64);
                let key = signal_key(interval_ms);
                doc.set(&key, 0.0);
                entries.push(ClockEntry {
                    interval_ms,
                    last_trigger_ms: now_ms,
                    cell: doc.stable_cell(&key),
                });
                Ok(())
            },
        );
    }
}

impl Default for ClockModule {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainModule<Engine> for ClockModule {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn update(&self, engine: &Engine) -> CommandResult {
        let now_ms = engine.global().get(time::keys::TIME_T_MS, 0u64);
        for entry in self.entries.lock().iter_mut() {
            entry.update(now_ms);
        }
        Ok(())
    }

    /// Rebuilds the entry list from `clock.active[]` after a state reload.
    fn reinit(&self, engine: &Engine) {
        let doc = engine.global();
        let mut entries = self.entries.lock();
        entries.clear();
        if doc.member_kind(keys::ACTIVE) != MemberKind::Array {
            return;
        }
        let now_ms = doc.get(time::keys::TIME_T_MS, 0u64);
        for i in 0..doc.member_size(keys::ACTIVE) {
            let interval_ms = doc.get(&format!("{}[{i}]", keys::ACTIVE), 0u64);
            if interval_ms == 0 {
                continue;
            }
            let key = signal_key(interval_ms);
            doc.set(&key, 0.0);
            entries.push(ClockEntry {
                interval_ms,
                last_trigger_ms: now_ms,
                cell: doc.stable_cell(&key),
            });
        }
    }
}
