//! String-command FIFOs with wait-counter gating.
//!
//! Three canonical queues drive the engine: `always` (never suspends,
//! replayed each frame), `internal` (engine-pushed), and `script`
//! (user/command-line/task-file-pushed). A queue drains until it is empty or
//! a `wait n` command raises the wait counter; the counter decrements by one
//! per rendered frame. A critical error stops the drain unless the engine
//! was started in recover mode.
//!
//! Handles are cheap clones over shared state, so command implementations
//! may push into a queue while that queue is being resolved.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CommandResult, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Commands are consumed as they run.
    Consume,
    /// The queue is replayed without consuming (the `always` queue).
    Replay,
}

struct QueueInner {
    commands: Mutex<VecDeque<String>>,
    wait_counter: AtomicU64,
}

#[derive(Clone)]
pub struct TaskQueue {
    name: &'static str,
    mode: QueueMode,
    can_wait: bool,
    inner: Arc<QueueInner>,
}

/// Result of one resolve pass.
#[derive(Debug, Default)]
pub struct QueueDrain {
    pub errors: Vec<EngineError>,
    pub first_critical: Option<EngineError>,
}

impl QueueDrain {
    pub fn encountered_critical(&self) -> bool {
        self.first_critical.is_some()
    }
}

impl TaskQueue {
    pub fn new(name: &'static str, mode: QueueMode, can_wait: bool) -> Self {
        Self {
            name,
            mode,
            can_wait,
            inner: Arc::new(QueueInner {
                commands: Mutex::new(VecDeque::new()),
                wait_counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push_back(&self, command: impl Into<String>) {
        self.inner.commands.lock().push_back(command.into());
    }

    pub fn push_front(&self, command: impl Into<String>) {
        self.inner.commands.lock().push_front(command.into());
    }

    pub fn clear(&self) {
        self.inner.commands.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.commands.lock().is_empty()
    }

    pub fn increment_wait_counter(&self, frames: u64) {
        self.inner.wait_counter.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn decrement_wait_counter(&self) {
        let _ = self
            .inner
            .wait_counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn wait_counter(&self) -> u64 {
        self.inner.wait_counter.load(Ordering::Relaxed)
    }

    pub fn is_waiting(&self) -> bool {
        self.can_wait && self.wait_counter() > 0
    }

    /// Drains the queue through `dispatch`. Stops when the queue is empty,
    /// when a dispatched command raises the wait counter, or when a critical
    /// error is returned and `recover` is off. Replay queues run their
    /// current contents once without consuming.
    pub fn resolve(&self, mut dispatch: impl FnMut(&str) -> CommandResult, recover: bool) -> QueueDrain {
        let mut drain = QueueDrain::default();
        if self.is_waiting() {
            return drain;
        }
        match self.mode {
            QueueMode::Consume => loop {
                let Some(command) = self.inner.commands.lock().pop_front() else {
                    break;
                };
                let stop = self.dispatch_one(&command, &mut dispatch, &mut drain, recover);
                if stop || self.is_waiting() {
                    break;
                }
            },
            QueueMode::Replay => {
                let snapshot: Vec<String> = self.inner.commands.lock().iter().cloned().collect();
                for command in snapshot {
                    if self.dispatch_one(&command, &mut dispatch, &mut drain, recover) {
                        break;
                    }
                }
            }
        }
        drain
    }

    fn dispatch_one(
        &self,
        command: &str,
        dispatch: &mut impl FnMut(&str) -> CommandResult,
        drain: &mut QueueDrain,
        recover: bool,
    ) -> bool {
        debug!(target: "runtime.tasks", queue = self.name, command, "dispatch");
        match dispatch(command) {
            Ok(()) => false,
            Err(err) => {
                let critical = err.is_critical();
                if critical && drain.first_critical.is_none() {
                    drain.first_critical = Some(err.clone());
                }
                drain.errors.push(err);
                critical && !recover
            }
        }
    }
}
