//! Steps and per-worker results.

use chrono::{DateTime, Utc};
use paralexe_exec::ExecError;
use serde::{Deserialize, Serialize};

use crate::job::Meta;
use crate::state::{StepState, StepStateError};
use crate::worker::{ReturnCode, Worker};

/// Result of one worker, attributed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub id: usize,
    pub command: String,
    pub return_code: ReturnCode,
    pub stdout: Option<Vec<String>>,
    pub stderr: Option<Vec<String>>,
    /// Process exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Why the worker could not run to completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    pub duration_ms: u64,
}

impl WorkerReport {
    /// Report for a worker whose `run()` returned.
    pub fn from_run(worker: &Worker, result: Result<ReturnCode, ExecError>, duration_ms: u64) -> Self {
        let output = worker.output().cloned().unwrap_or_default();
        let (return_code, error) = match result {
            Ok(code) => (code, None),
            Err(e) => (ReturnCode::Failure, Some(e.to_string())),
        };
        Self {
            id: worker.id(),
            command: worker.cmd().to_string(),
            return_code,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: worker.executor().exit_code(),
            error,
            meta: worker.meta().cloned(),
            duration_ms,
        }
    }

    /// Failure report for a worker that did not produce a result.
    pub fn failure(worker: &Worker, error: impl Into<String>) -> Self {
        Self {
            id: worker.id(),
            command: worker.cmd().to_string(),
            return_code: ReturnCode::Failure,
            stdout: None,
            stderr: None,
            exit_code: None,
            error: Some(error.into()),
            meta: worker.meta().cloned(),
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.return_code.is_success()
    }
}

/// A priority-keyed group of workers run together.
#[derive(Debug)]
pub struct Step {
    priority: i64,
    label: Option<String>,
    state: StepState,
    workers: Vec<Worker>,
    worker_count: usize,
    reports: Vec<WorkerReport>,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub(crate) fn new(priority: i64, label: Option<String>, workers: Vec<Worker>) -> Self {
        Self {
            priority,
            label,
            state: StepState::Pending,
            worker_count: workers.len(),
            workers,
            reports: Vec::new(),
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Transition to a new state
    pub(crate) fn transition(&mut self, to: StepState) -> Result<(), StepStateError> {
        if !self.state.can_transition_to(to) {
            return Err(StepStateError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        match to {
            StepState::Running => {
                self.attempts += 1;
                self.started_at = Some(Utc::now());
                self.finished_at = None;
            }
            StepState::Pending => {
                self.started_at = None;
                self.finished_at = None;
            }
            _ => self.finished_at = Some(Utc::now()),
        }
        self.state = to;
        Ok(())
    }

    /// Replace the workers and clear earlier results.
    pub(crate) fn requeue(
        &mut self,
        workers: Vec<Worker>,
        label: Option<String>,
    ) -> Result<(), StepStateError> {
        self.transition(StepState::Pending)?;
        self.worker_count = workers.len();
        self.workers = workers;
        self.reports.clear();
        if label.is_some() {
            self.label = label;
        }
        Ok(())
    }

    pub(crate) fn take_workers(&mut self) -> Vec<Worker> {
        std::mem::take(&mut self.workers)
    }

    /// Store results sorted by worker id and classify the step.
    pub(crate) fn finish(&mut self, mut reports: Vec<WorkerReport>) -> Result<StepState, StepStateError> {
        reports.sort_by_key(|r| r.id);
        let successes = reports.iter().filter(|r| r.succeeded()).count();
        self.reports = reports;

        let outcome = StepState::classify(successes, self.worker_count);
        self.transition(outcome)?;
        Ok(outcome)
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Label if set, otherwise `step <priority>`.
    pub fn display_name(&self) -> String {
        match self.label {
            Some(ref label) => label.clone(),
            None => format!("step {}", self.priority),
        }
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Workers the step was (last) queued with.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers still waiting to run.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Results of the last run, ordered by worker id.
    pub fn reports(&self) -> &[WorkerReport] {
        &self.reports
    }

    pub fn succeeded_workers(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_workers(&self) -> usize {
        self.reports.len() - self.succeeded_workers()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}
