//! The engine root: global store, task queues, scene, pair engine, and the
//! per-frame control flow.
//!
//! One `update()` call is one frame:
//!
//! 1. drain the `always` queue and, until a wait fires, the `script` queue,
//! 2. advance simulation time and the periodic clocks,
//! 3. update the scene container (per-tile batch workers; each object runs
//!    its local rulesets, broadcasts its global ones, and registers as a
//!    listener for its subscriptions),
//! 4. process the frame's pair set on the invoke workers,
//! 5. settle reinsertion/deletion pipelines and deferred global calls.
//!
//! The engine is headless: display state (camera, resolution, fps) lives in
//! the global store, and the window/renderer integration is an external
//! collaborator reading the exposed rects and layers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use core_document::{Document, capture};
use core_expr::ExprContext;
use core_rules::{InvokeConfig, InvokeEngine};
use core_runtime::{
    CommandResult, DomainModule, EngineError, FuncTree, QueueMode, TaskQueue, init_guard,
};
use core_scene::{Environment, SceneObject};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::ClockModule;
use crate::commands;
use crate::config::EngineConfig;
use crate::rng::RngModule;
use crate::time::TimeModule;

pub mod keys {
    pub const DISPLAY_RES_X: &str = "display.resolution.x";
    pub const DISPLAY_RES_Y: &str = "display.resolution.y";
    pub const DISPLAY_SCALE: &str = "display.scale";
    pub const DISPLAY_FPS: &str = "display.fps";
    pub const DISPLAY_SHOW_FPS: &str = "display.showFps";
    pub const CAM_X: &str = "camera.x";
    pub const CAM_Y: &str = "camera.y";
}

/// The three canonical command queues.
pub struct Tasks {
    /// Replayed every frame; never suspends.
    pub always: TaskQueue,
    /// Engine-pushed work.
    pub internal: TaskQueue,
    /// User / command-line / task-file work; honors `wait`.
    pub script: TaskQueue,
}

pub struct Engine {
    config: EngineConfig,
    global: Arc<Document>,
    /// Stand-in self document for expressions evaluated at the shell level.
    shell_doc: Arc<Document>,
    tree: FuncTree<Engine>,
    pub tasks: Tasks,
    env: Mutex<Environment>,
    invoke: InvokeEngine,
    time: TimeModule,
    clock: ClockModule,
    rng: RngModule,
    draft: Mutex<Option<Arc<SceneObject>>>,
    selected: Mutex<Option<Arc<SceneObject>>>,
    next_id: AtomicU32,
    display_active: AtomicBool,
    quit: AtomicBool,
    recover: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Engine> {
        Self::with_recover(config, false)
    }

    /// `recover` keeps queues draining past critical errors.
    pub fn with_recover(config: EngineConfig, recover: bool) -> Arc<Engine> {
        let global = Arc::new(Document::new());
        global.set(keys::DISPLAY_RES_X, u64::from(config.display.width));
        global.set(keys::DISPLAY_RES_Y, u64::from(config.display.height));
        global.set(keys::DISPLAY_SCALE, 1.0);
        global.set(keys::DISPLAY_FPS, u64::from(config.display.fps));
        global.set(keys::DISPLAY_SHOW_FPS, false);
        global.set(keys::CAM_X, 0.0);
        global.set(keys::CAM_Y, 0.0);

        let guard = init_guard::enter();
        let time = TimeModule::new();
        let clock = ClockModule::new();
        let rng = RngModule::new();
        drop(guard);

        let mut tree = FuncTree::new("Tessera");
        commands::register_all(&mut tree);
        time.register_commands(&mut tree);
        clock.register_commands(&mut tree);
        // Randomness is consumed per parsed command; rolling it into the
        // pre-parse hook keeps consumption independent of frame timing.
        tree.set_pre_parse(|engine: &Engine| {
            engine.rng.advance(engine);
            Ok(())
        });

        let engine = Arc::new(Engine {
            invoke: InvokeEngine::new(InvokeConfig {
                workers: config.invoke.workers,
                sweep_denominator: config.invoke.sweep_denominator,
            }),
            env: Mutex::new(Environment::new(config.scene.batch_cost_goal)),
            tasks: Tasks {
                always: TaskQueue::new("always", QueueMode::Replay, false),
                internal: TaskQueue::new("internal", QueueMode::Consume, true),
                script: TaskQueue::new("script", QueueMode::Consume, true),
            },
            global,
            shell_doc: Arc::new(Document::new()),
            tree,
            time,
            clock,
            rng,
            draft: Mutex::new(None),
            selected: Mutex::new(None),
            next_id: AtomicU32::new(1),
            display_active: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            recover,
            config,
        });

        // `nebs` transformation queries and deserialize pipelines on the
        // global store dispatch back into the engine's command tree.
        let weak = Arc::downgrade(&engine);
        engine.global.set_command_hook(Arc::new(move |_, command| {
            weak.upgrade()
                .map(|engine| engine.parse_str(command).is_ok())
                .unwrap_or(false)
        }));
        info!(target: "engine", workers = engine.invoke.worker_count(), "engine ready");
        engine
    }

    //------------------------------------------------------------------
    // Accessors

    pub fn global(&self) -> &Arc<Document> {
        &self.global
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn invoke(&self) -> &InvokeEngine {
        &self.invoke
    }

    pub(crate) fn rng_module(&self) -> &RngModule {
        &self.rng
    }

    pub(crate) fn draft_slot(&self) -> &Mutex<Option<Arc<SceneObject>>> {
        &self.draft
    }

    pub(crate) fn selected_slot(&self) -> &Mutex<Option<Arc<SceneObject>>> {
        &self.selected
    }

    /// Context for expressions evaluated from the command shell, where no
    /// entity provides a self document.
    pub fn expr_context(&self) -> ExprContext {
        ExprContext::new(self.shell_doc.clone(), self.global.clone())
    }

    pub fn resolution(&self) -> (u32, u32) {
        (
            self.global.get(keys::DISPLAY_RES_X, 1000u64).max(1) as u32,
            self.global.get(keys::DISPLAY_RES_Y, 1000u64).max(1) as u32,
        )
    }

    pub fn camera_tile(&self) -> (i16, i16) {
        let (res_x, res_y) = self.resolution();
        let x = self.global.get(keys::CAM_X, 0.0);
        let y = self.global.get(keys::CAM_Y, 0.0);
        (
            (x / f64::from(res_x)).floor() as i16,
            (y / f64::from(res_y)).floor() as i16,
        )
    }

    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn activate_display(&self) {
        self.display_active.store(true, Ordering::Relaxed);
    }

    pub fn is_display_active(&self) -> bool {
        self.display_active.load(Ordering::Relaxed)
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    pub fn with_env<R>(&self, f: impl FnOnce(&mut Environment) -> R) -> R {
        f(&mut self.env.lock())
    }

    pub fn object_count(&self) -> usize {
        self.env.lock().object_count()
    }

    pub fn find_object(&self, id: u32) -> Option<Arc<SceneObject>> {
        self.env.lock().find_object(id)
    }

    //------------------------------------------------------------------
    // Command dispatch

    pub fn parse_str(&self, line: &str) -> CommandResult {
        self.tree.parse_str(self, line)
    }

    /// Splits a `cmd;cmd;…` line onto the script queue — the command-line
    /// entry path.
    pub fn queue_command_line(&self, line: &str) {
        for command in line.split(';') {
            let command = command.trim();
            if !command.is_empty() {
                self.tasks.script.push_back(command);
            }
        }
    }

    /// Resolves an object spec against the resource fallback directories,
    /// preserving any `|cmd` pipeline tail.
    pub fn resolve_object_spec(&self, spec: &str) -> Option<String> {
        let (head, tail) = match spec.split_once('|') {
            Some((head, tail)) => (head.trim(), Some(tail)),
            None => (spec.trim(), None),
        };
        let found = if std::path::Path::new(head).exists() {
            Some(head.to_string())
        } else {
            self.config
                .resources
                .object_dirs
                .iter()
                .map(|dir| format!("{dir}/{head}"))
                .find(|candidate| std::path::Path::new(candidate).exists())
        }?;
        Some(match tail {
            Some(tail) => format!("{found}|{tail}"),
            None => found,
        })
    }

    /// Loads, registers, and places a scene object.
    pub fn spawn_object(&self, spec: &str) -> Result<Arc<SceneObject>, EngineError> {
        let resolved = self
            .resolve_object_spec(spec)
            .ok_or_else(|| EngineError::InvalidFile(spec.to_string()))?;
        let object = SceneObject::from_spec(&resolved, self.global.clone());
        object.set_object_id(self.allocate_id());
        self.env.lock().append(object.clone(), self.resolution());
        self.activate_display();
        debug!(target: "engine", id = object.object_id(), spec, "object spawned");
        Ok(object)
    }

    pub fn reinit_modules(&self) {
        self.time.reinit(self);
        self.clock.reinit(self);
        self.rng.reinit(self);
    }

    //------------------------------------------------------------------
    // Frame loop

    fn parse_queues(&self) -> CommandResult {
        for queue in [&self.tasks.always, &self.tasks.internal, &self.tasks.script] {
            let drain = queue.resolve(|command| self.parse_str(command), self.recover);
            for err in &drain.errors {
                capture::err(format!("[{}] {err}", queue.name()));
            }
            if let Some(critical) = drain.first_critical
                && !self.recover
            {
                return Err(critical);
            }
        }
        Ok(())
    }

    /// One frame. Returns the critical error that stopped the loop, if any.
    pub fn update(&self) -> CommandResult {
        if let Err(critical) = self.parse_queues() {
            self.quit.store(true, Ordering::Relaxed);
            return Err(critical);
        }

        if self.is_display_active() {
            let _ = self.time.update(self);
            if self.time.simulation_progressed() {
                let _ = self.clock.update(self);
                let camera_tile = self.camera_tile();
                let resolution = self.resolution();
                self.env
                    .lock()
                    .update(camera_tile, resolution, &self.invoke);
                self.invoke.update();
                for call in self.invoke.drain_global_calls() {
                    self.tasks.script.push_back(call);
                }
                // Wait counters advance only on frames that actually ran.
                for queue in [&self.tasks.always, &self.tasks.internal, &self.tasks.script] {
                    queue.decrement_wait_counter();
                }
            }
        } else if self.tasks.script.is_waiting() {
            // A waiting script without a display still progresses one frame
            // per loop iteration.
            self.tasks.script.decrement_wait_counter();
        }
        Ok(())
    }

    pub fn should_continue(&self) -> bool {
        if self.quit.load(Ordering::Relaxed) {
            return false;
        }
        self.is_display_active()
            || self.tasks.script.is_waiting()
            || !self.tasks.script.is_empty()
            || !self.tasks.internal.is_empty()
    }

    /// Frame budget from the configured fps; the binary sleeps this long
    /// between updates unless running headless.
    pub fn frame_budget(&self) -> std::time::Duration {
        let fps = self.global.get(keys::DISPLAY_FPS, 60u64).clamp(1, 1000);
        std::time::Duration::from_micros(1_000_000 / fps)
    }
}
