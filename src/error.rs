use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of an external command that never produced an exit code.
///
/// A non-zero exit is not represented here: it comes back as a normal
/// [`CommandOutput`](crate::runner::CommandOutput) for the caller to interpret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command timeout")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to launch `{command}` in {}: {message}", cwd.display())]
    Launch {
        command: String,
        cwd: PathBuf,
        message: String,
    },
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("a fetch pass is already in progress")]
    AlreadyRunning,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}
