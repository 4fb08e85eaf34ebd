//! The seam between the rule engine and the objects it acts on.

use std::sync::Arc;

use core_document::Document;
use core_runtime::CommandResult;

/// Anything a ruleset can read, mutate, and send commands to. Scene objects
/// implement this; tests may substitute lightweight stand-ins.
pub trait RuleTarget: Send + Sync {
    /// Engine-unique id; also the pair-engine routing key (`id % workers`).
    fn id(&self) -> u32;

    /// The backing document.
    fn doc(&self) -> &Arc<Document>;

    /// Dispatches a command line on the target's own function tree.
    fn dispatch(&self, command: &str) -> CommandResult;
}
