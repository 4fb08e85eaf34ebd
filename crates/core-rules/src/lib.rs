//! The declarative rule engine: assignments, rulesets (local and
//! topic-broadcast), the compiler that builds them from entity documents,
//! and the double-buffered pair engine that applies them with frame-level
//! deterministic ordering.

pub mod assignment;
pub mod compiler;
pub mod invoke;
pub mod ruleset;
pub mod target;

pub use assignment::{AssignOp, Assignment, TargetKind};
pub use compiler::{CompiledRulesets, compile};
pub use invoke::{DEFAULT_SWEEP_DENOMINATOR, DEFAULT_WORKERS, InvokeConfig, InvokeEngine};
pub use ruleset::{
    GlobalCallSink, Ruleset, StaticContext, StaticRulesetDef, StaticRulesetFn,
    new_global_call_sink, register_static_ruleset, static_ruleset,
};
pub use target::RuleTarget;
