//! The pair engine: per-frame topic matching and parallel application.
//!
//! Broadcasters insert their rulesets into the *next* frame's pair
//! container; listeners match against the *this* frame's container, so every
//! broadcast issued in frame N is applied exactly once in frame N+1 to each
//! listener whose condition held.
//!
//! Work is partitioned across `W` persistent workers by `owner_id % W`: a
//! broadcaster's rulesets always live in one slot, so no two workers touch
//! the same broadcaster or the same listener-in-a-topic entry. Within a
//! slot, processing order is deterministic — topic insertion order, then
//! broadcaster id, then listener id.
//!
//! Inactive listener entries are swept out with probability `1/N` per
//! ruleset per frame (tunable, default 1/100); listeners re-register every
//! frame, so the sweep only bounds map growth.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use core_runtime::Prng;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::ruleset::{GlobalCallSink, Ruleset, new_global_call_sink};
use crate::target::RuleTarget;

/// Default worker slot count.
pub const DEFAULT_WORKERS: usize = 4;
/// Default denominator of the listener sweep probability.
pub const DEFAULT_SWEEP_DENOMINATOR: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct InvokeConfig {
    pub workers: usize,
    pub sweep_denominator: u32,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            sweep_denominator: DEFAULT_SWEEP_DENOMINATOR,
        }
    }
}

struct Pair {
    ruleset: Arc<Ruleset>,
    listener: Arc<dyn RuleTarget>,
    active: bool,
}

struct RulesetSlot {
    ruleset: Arc<Ruleset>,
    listeners: BTreeMap<u32, Pair>,
}

#[derive(Default)]
struct BroadcasterEntry {
    active: bool,
    rulesets: BTreeMap<u32, RulesetSlot>,
}

/// topic → broadcaster id → { active, ruleset index → listeners }.
type PairContainer = IndexMap<String, BTreeMap<u32, BroadcasterEntry>>;

struct Slot {
    this_frame: Mutex<PairContainer>,
    next_frame: Mutex<PairContainer>,
}

pub struct InvokeEngine {
    slots: Vec<Arc<Slot>>,
    wake: Vec<crossbeam_channel::Sender<()>>,
    done: crossbeam_channel::Receiver<usize>,
    handles: Vec<JoinHandle<()>>,
    global_calls: GlobalCallSink,
}

impl InvokeEngine {
    pub fn new(config: InvokeConfig) -> InvokeEngine {
        let workers = config.workers.max(1);
        let global_calls = new_global_call_sink();
        let mut slots = Vec::with_capacity(workers);
        let mut wake = Vec::with_capacity(workers);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let slot = Arc::new(Slot {
                this_frame: Mutex::new(PairContainer::default()),
                next_frame: Mutex::new(PairContainer::default()),
            });
            slots.push(slot.clone());
            let (wake_tx, wake_rx) = crossbeam_channel::unbounded::<()>();
            wake.push(wake_tx);
            let done_tx = done_tx.clone();
            let sink = global_calls.clone();
            let sweep = config.sweep_denominator.max(1);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("invoke-{index}"))
                    .spawn(move || {
                        let mut sweep_rng = Prng::from_seed_u64(0x7e55_e4a + index as u64);
                        while wake_rx.recv().is_ok() {
                            {
                                let mut container = slot.this_frame.lock();
                                process_slot(&mut container, &sink, sweep, &mut sweep_rng);
                            }
                            if done_tx.send(index).is_err() {
                                break;
                            }
                        }
                        trace!(target: "rules.invoke", worker = index, "worker stopped");
                    })
                    .expect("failed to spawn invoke worker"),
            );
        }
        debug!(target: "rules.invoke", workers, "pair engine started");
        InvokeEngine {
            slots,
            wake,
            done: done_rx,
            handles,
            global_calls,
        }
    }

    fn slot_for(&self, id: u32) -> &Arc<Slot> {
        &self.slots[id as usize % self.slots.len()]
    }

    /// Inserts a global ruleset into the next frame's container and marks
    /// its broadcaster active.
    pub fn broadcast(&self, ruleset: &Arc<Ruleset>) {
        let slot = self.slot_for(ruleset.owner_id);
        let mut next = slot.next_frame.lock();
        let entry = next
            .entry(ruleset.topic.clone())
            .or_default()
            .entry(ruleset.owner_id)
            .or_default();
        entry.active = true;
        entry
            .rulesets
            .entry(ruleset.index)
            .and_modify(|slot| slot.ruleset = ruleset.clone())
            .or_insert_with(|| RulesetSlot {
                ruleset: ruleset.clone(),
                listeners: BTreeMap::new(),
            });
    }

    /// Registers `listener` against every active broadcaster on `topic` in
    /// this frame's containers, evaluating each ruleset's condition now.
    pub fn listen(&self, listener: &Arc<dyn RuleTarget>, topic: &str, listener_id: u32) {
        for slot in &self.slots {
            let mut this = slot.this_frame.lock();
            let Some(broadcasters) = this.get_mut(topic) else {
                continue;
            };
            for (&broadcaster_id, entry) in broadcasters.iter_mut() {
                if broadcaster_id == listener_id || !entry.active {
                    continue;
                }
                for ruleset_slot in entry.rulesets.values_mut() {
                    let active = ruleset_slot.ruleset.evaluate_condition(listener.doc());
                    ruleset_slot.listeners.insert(
                        listener_id,
                        Pair {
                            ruleset: ruleset_slot.ruleset.clone(),
                            listener: listener.clone(),
                            active,
                        },
                    );
                }
            }
        }
    }

    /// Processes this frame's pair set on the worker threads, waits for
    /// completion, then swaps the double-buffered containers.
    pub fn update(&self) {
        for tx in &self.wake {
            let _ = tx.send(());
        }
        for _ in 0..self.slots.len() {
            let _ = self.done.recv();
        }
        // No workers are active now, so taking both locks is uncontended.
        for slot in &self.slots {
            let mut this = slot.this_frame.lock();
            let mut next = slot.next_frame.lock();
            std::mem::swap(&mut *this, &mut *next);
        }
    }

    /// Drains the `functioncalls.global` lines produced since the last call.
    pub fn drain_global_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.global_calls.lock())
    }

    pub fn global_call_sink(&self) -> GlobalCallSink {
        self.global_calls.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for InvokeEngine {
    fn drop(&mut self) {
        self.wake.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn process_slot(
    container: &mut PairContainer,
    sink: &GlobalCallSink,
    sweep_denominator: u32,
    sweep_rng: &mut Prng,
) {
    for broadcasters in container.values_mut() {
        for entry in broadcasters.values_mut() {
            if !entry.active {
                continue;
            }
            for ruleset_slot in entry.rulesets.values_mut() {
                for pair in ruleset_slot.listeners.values_mut() {
                    if pair.active {
                        pair.ruleset.apply(&pair.listener, sink);
                        pair.active = false;
                    }
                }
                if sweep_rng.next_below(sweep_denominator) == 0 {
                    ruleset_slot.listeners.retain(|_, pair| pair.active);
                }
            }
            // Must be re-armed by the next broadcast.
            entry.active = false;
        }
    }
}
