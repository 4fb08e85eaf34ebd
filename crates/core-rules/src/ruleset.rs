//! Rulesets: condition + assignments + deferred function calls.
//!
//! A ruleset is either data (parsed from an entity's `invokes[]` JSON) or a
//! static function registered under a `::name`. A ruleset with an empty
//! topic is local — it applies only to its owner during the owner's update.
//! A non-empty topic makes it global: it is broadcast on that topic every
//! frame and applied to each listener whose condition held.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use core_document::{Document, capture};
use core_expr::PooledExpr;
use parking_lot::{Mutex, RwLock};

use crate::assignment::Assignment;
use crate::target::RuleTarget;

/// Shared sink for `functioncalls.global` lines produced during rule
/// application on worker threads; the engine drains it into the script queue
/// once per frame.
pub type GlobalCallSink = Arc<Mutex<Vec<String>>>;

pub fn new_global_call_sink() -> GlobalCallSink {
    Arc::new(Mutex::new(Vec::new()))
}

//----------------------------------------------------------------------
// Static ruleset registry

pub struct StaticContext<'a> {
    pub self_target: &'a dyn RuleTarget,
    pub other: &'a dyn RuleTarget,
    pub global: &'a Arc<Document>,
}

pub type StaticRulesetFn = fn(&StaticContext<'_>);

#[derive(Clone)]
pub struct StaticRulesetDef {
    /// Broadcast topic; empty means local-only.
    pub topic: String,
    pub func: StaticRulesetFn,
}

fn registry() -> &'static RwLock<HashMap<String, StaticRulesetDef>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, StaticRulesetDef>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a compiled ruleset under `name` (referenced as `::name` from
/// entity `invokes[]` arrays).
pub fn register_static_ruleset(name: &str, def: StaticRulesetDef) {
    registry().write().insert(name.to_string(), def);
}

pub fn static_ruleset(name: &str) -> Option<StaticRulesetDef> {
    registry().read().get(name).cloned()
}

//----------------------------------------------------------------------
// Ruleset

pub struct Ruleset {
    pub topic: String,
    pub owner_id: u32,
    pub index: u32,
    pub estimated_cost: u64,
    condition: PooledExpr,
    always_true: bool,
    assignments: Vec<Assignment>,
    calls_self: Vec<PooledExpr>,
    calls_other: Vec<PooledExpr>,
    calls_global: Vec<PooledExpr>,
    static_fn: Option<StaticRulesetFn>,
    self_target: Weak<dyn RuleTarget>,
    global: Arc<Document>,
}

pub(crate) struct RulesetParts {
    pub topic: String,
    pub condition: PooledExpr,
    pub always_true: bool,
    pub assignments: Vec<Assignment>,
    pub calls_self: Vec<PooledExpr>,
    pub calls_other: Vec<PooledExpr>,
    pub calls_global: Vec<PooledExpr>,
    pub static_fn: Option<StaticRulesetFn>,
}

impl Ruleset {
    pub(crate) fn from_parts(
        parts: RulesetParts,
        self_target: Weak<dyn RuleTarget>,
        global: Arc<Document>,
    ) -> Ruleset {
        let mut estimated_cost = parts.condition.variable_count() as u64;
        estimated_cost += parts.assignments.iter().map(Assignment::cost).sum::<u64>();
        for call in parts
            .calls_self
            .iter()
            .chain(&parts.calls_other)
            .chain(&parts.calls_global)
        {
            estimated_cost += call.variable_count() as u64 + 1;
        }
        Ruleset {
            topic: parts.topic,
            owner_id: 0,
            index: 0,
            estimated_cost,
            condition: parts.condition,
            always_true: parts.always_true,
            assignments: parts.assignments,
            calls_self: parts.calls_self,
            calls_other: parts.calls_other,
            calls_global: parts.calls_global,
            static_fn: parts.static_fn,
            self_target,
            global,
        }
    }

    pub fn is_local(&self) -> bool {
        self.topic.is_empty()
    }

    pub(crate) fn assignments_mut(&mut self) -> &mut Vec<Assignment> {
        &mut self.assignments
    }

    /// Evaluates the condition against a prospective listener. NaN is false;
    /// any magnitude above epsilon is true. The literal condition `1` is
    /// short-circuited.
    pub fn evaluate_condition(&self, listener_doc: &Arc<Document>) -> bool {
        if self.always_true {
            return true;
        }
        let result = self.condition.eval_as_double(Some(listener_doc));
        !result.is_nan() && result.abs() > f64::EPSILON
    }

    /// Applies the ruleset to a listener: assignments first, then deferred
    /// function calls. Self and other calls dispatch inline on the owning /
    /// listening target's function tree; global calls are deferred through
    /// the sink.
    pub fn apply(&self, listener: &Arc<dyn RuleTarget>, global_calls: &GlobalCallSink) {
        let Some(self_target) = self.self_target.upgrade() else {
            return;
        };
        if let Some(func) = self.static_fn {
            func(&StaticContext {
                self_target: self_target.as_ref(),
                other: listener.as_ref(),
                global: &self.global,
            });
            return;
        }

        let self_doc = self_target.doc().clone();
        let other_doc = listener.doc().clone();
        for assignment in &self.assignments {
            assignment.apply(&self_doc, Some(&other_doc), &self.global);
        }
        for call in &self.calls_global {
            global_calls.lock().push(call.eval(Some(&other_doc)));
        }
        for call in &self.calls_self {
            let command = call.eval(Some(&other_doc));
            if let Err(err) = self_target.dispatch(&command) {
                capture::err(format!("self call `{command}` failed: {err}"));
            }
        }
        for call in &self.calls_other {
            let command = call.eval(Some(&other_doc));
            if let Err(err) = listener.dispatch(&command) {
                capture::err(format!("other call `{command}` failed: {err}"));
            }
        }
    }
}
