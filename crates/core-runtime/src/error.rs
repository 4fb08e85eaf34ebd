//! The engine error model: a tagged value with severity and description.
//!
//! Every command returns a [`CommandResult`]; `Ok(())` is "no error". A task
//! queue stops draining on a critical error (unless the engine runs in
//! recover mode), and a critical surfaced from the main update loop stops
//! the loop. Non-critical errors are logged and execution continues.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    NonCritical,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    // Functional
    #[error("too few arguments for `{0}`")]
    TooFewArgs(String),
    #[error("too many arguments for `{0}`")]
    TooManyArgs(String),
    #[error("unknown argument: {0}")]
    UnknownArg(String),
    #[error("invalid argument `{arg}`: {reason}")]
    InvalidArg { arg: String, reason: String },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("function not implemented: {0}")]
    NotImplemented(String),
    // File
    #[error("invalid file: {0}")]
    InvalidFile(String),
    #[error("refusing to write through symlink: {0}")]
    SymlinkRefused(String),
    // Texture
    #[error("texture operation failed: {0}")]
    Texture(String),
    // Renderer
    #[error("renderer: {0}")]
    Renderer(String),
    // User-defined
    #[error("{0}")]
    Warning(String),
    #[error("{0}")]
    UserError(String),
    #[error("{0}")]
    Critical(String),
}

impl EngineError {
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::NotImplemented(_)
            | EngineError::InvalidFile(_)
            | EngineError::SymlinkRefused(_)
            | EngineError::Renderer(_)
            | EngineError::Critical(_) => Severity::Critical,
            _ => Severity::NonCritical,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity() == Severity::Critical
    }
}

pub type CommandResult = Result<(), EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities() {
        assert!(!EngineError::TooFewArgs("set".into()).is_critical());
        assert!(!EngineError::Warning("careful".into()).is_critical());
        assert!(EngineError::InvalidFile("x.jsonc".into()).is_critical());
        assert!(EngineError::Critical("assert failed".into()).is_critical());
    }

    #[test]
    fn descriptions_render() {
        let err = EngineError::InvalidArg {
            arg: "n".into(),
            reason: "not a number".into(),
        };
        assert_eq!(err.to_string(), "invalid argument `n`: not a number");
    }
}
