//! Paralexe - parallel command execution in priority-ordered steps
//!
//! A [`Manager`] expands a command template with placeholder arguments into
//! one [`Worker`] per job. A [`Scheduler`] runs steps of workers in ascending
//! priority, each step on a bounded thread pool, and classifies every step as
//! succeeded, failed or incomplete.

pub mod allocator;
pub mod config;
pub mod error;
pub mod job;
pub mod jobfile;
pub mod logging;
pub mod manager;
pub mod scheduler;
pub mod signal;
pub mod state;
pub mod summary;
pub mod worker;

pub use allocator::{placeholders, JobAllocator};
pub use config::{ConfigError, EffectiveConfig, Settings};
pub use error::ManagerError;
pub use job::{ArgValue, Decorator, Meta};
pub use jobfile::{JobFile, JobFileError};
pub use manager::Manager;
pub use scheduler::{
    Progress, QueueOutcome, Scheduler, SchedulerConfig, SchedulerError, Step, SubmitHandle,
    WorkerReport,
};
pub use state::StepState;
pub use summary::{RunStatus, RunSummary};
pub use worker::{ClassifyPolicy, ReturnCode, Worker};

pub use paralexe_exec::{
    Backend, CancelToken, ExecError, Executor, SlurmConfig, SshConfig, TimeoutConfig,
};
