//! Configuration errors raised while building workers.
//!
//! All of these surface before any worker is dispatched.

use thiserror::Error;

use crate::scheduler::SchedulerError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("no command template set")]
    CommandNotSet,

    #[error("malformed decorator: {0}")]
    InvalidDecorator(String),

    #[error("argument {label:?} has length {found}, other arguments have length {expected}")]
    ArgLengthMismatch {
        label: String,
        expected: usize,
        found: usize,
    },

    #[error("argument {0:?} is an empty list")]
    EmptyArgList(String),

    #[error("placeholders and arguments differ: missing arguments {missing:?}, unused arguments {unexpected:?}")]
    PlaceholderMismatch {
        /// In the template, not in the arguments
        missing: Vec<String>,
        /// In the arguments, not in the template
        unexpected: Vec<String>,
    },

    #[error("metadata {label:?} has length {found}, expected {expected}")]
    MetaLengthMismatch {
        label: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Schedule(#[from] SchedulerError),
}
