//! Errors raised while running a command.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors from executor operations.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("unbalanced quoting in command: {0}")]
    UnbalancedQuote(String),

    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("remote channel error: {0}")]
    Remote(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {limit:?}")]
    TimedOut { limit: Duration },
}

/// Result type for executor operations.
pub type ExecResult<T> = Result<T, ExecError>;
