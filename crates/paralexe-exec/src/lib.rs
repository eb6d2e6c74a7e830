//! Process execution for paralexe workers.
//!
//! An [`Executor`] runs one command through a [`Backend`] (local
//! subprocess, ssh host, or slurm `srun`), capturing stdout and stderr in
//! memory. Execution can be bounded by a timeout and stopped through a
//! shared [`CancelToken`].

pub mod argv;
pub mod backend;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod timeout;

pub use argv::{join_args, split_command};
pub use backend::{Backend, ProcessId, SlurmConfig, SshConfig};
pub use cancel::CancelToken;
pub use error::{ExecError, ExecResult};
pub use executor::{ExecOptions, Executor, PidHandle};
pub use timeout::{TimeoutConfig, TimeoutValidationError};
