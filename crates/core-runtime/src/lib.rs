//! Runtime plumbing: the typed error model, the function-tree command
//! dispatcher, task queues with wait-counter gating, and domain/module
//! composition.

pub mod data_commands;
pub mod domain;
pub mod error;
pub mod functree;
pub mod prng;
pub mod task_queue;

pub use domain::{DomainModule, ModuleSet, init_guard};
pub use error::{CommandResult, EngineError, Severity};
pub use functree::{FuncTree, parse_quoted_arguments, recombine_args};
pub use prng::Prng;
pub use task_queue::{QueueDrain, QueueMode, TaskQueue};
