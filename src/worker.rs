//! Worker: one resolved command plus its executor.
//!
//! `run()` executes the command and classifies the result. A worker fails
//! when any captured stderr line contains the error token (`ERROR` by
//! default); other stderr output is treated as warnings.

use paralexe_exec::{ExecError, ExecOptions, Executor};
use serde::{Deserialize, Serialize};

use crate::job::Meta;

/// Token whose presence on a stderr line marks a worker as failed.
pub const DEFAULT_ERROR_TOKEN: &str = "ERROR";

/// Outcome of a worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnCode {
    Success,
    Failure,
}

impl ReturnCode {
    /// Numeric code: 0 for success, 1 for failure.
    pub fn code(&self) -> i32 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::Failure => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReturnCode::Success)
    }
}

/// How captured output is classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyPolicy {
    pub error_token: String,
    /// Treat a non-zero exit status as failure too.
    pub fail_on_nonzero_exit: bool,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self {
            error_token: DEFAULT_ERROR_TOKEN.to_string(),
            fail_on_nonzero_exit: false,
        }
    }
}

impl ClassifyPolicy {
    pub fn classify(&self, stderr: Option<&[String]>, exit_code: Option<i32>) -> ReturnCode {
        let tagged = stderr
            .map(|lines| lines.iter().any(|l| l.contains(&self.error_token)))
            .unwrap_or(false);
        let bad_exit = self.fail_on_nonzero_exit && exit_code != Some(0);

        if tagged || bad_exit {
            ReturnCode::Failure
        } else {
            ReturnCode::Success
        }
    }
}

/// Decoded output of a run. `None` stands for "no output".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub stdout: Option<Vec<String>>,
    pub stderr: Option<Vec<String>>,
}

/// Decode bytes as UTF-8 into non-empty lines; `None` when there are none.
pub fn decode_lines(bytes: &[u8]) -> Option<Vec<String>> {
    let lines: Vec<String> = String::from_utf8_lossy(bytes)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines)
    }
}

#[derive(Debug)]
pub struct Worker {
    id: usize,
    executor: Executor,
    meta: Option<Meta>,
    output: Option<WorkerOutput>,
}

impl Worker {
    pub fn new(id: usize, executor: Executor, meta: Option<Meta>) -> Self {
        Self {
            id,
            executor,
            meta,
            output: None,
        }
    }

    /// Execute and classify.
    ///
    /// Errors from the executor propagate; the scheduler turns them into
    /// failure results.
    pub fn run(
        &mut self,
        options: &ExecOptions,
        policy: &ClassifyPolicy,
    ) -> Result<ReturnCode, ExecError> {
        self.output = None;
        let executed = self.executor.execute(options);

        // Keep whatever was captured, even from an interrupted run.
        let output = WorkerOutput {
            stdout: decode_lines(self.executor.stdout()),
            stderr: decode_lines(self.executor.stderr()),
        };
        let return_code = policy.classify(output.stderr.as_deref(), self.executor.exit_code());
        self.output = Some(output);
        executed?;

        tracing::debug!(
            worker_id = self.id,
            exit_code = ?self.executor.exit_code(),
            return_code = return_code.code(),
            "Worker finished"
        );
        Ok(return_code)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The resolved command.
    pub fn cmd(&self) -> &str {
        self.executor.command()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    /// Decoded output; `None` until `run()` was called.
    pub fn output(&self) -> Option<&WorkerOutput> {
        self.output.as_ref()
    }
}
