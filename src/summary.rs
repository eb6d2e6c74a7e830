//! Run summary
//!
//! Serializable report over every step of a scheduler, with a generated
//! one-line human summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::Step;
use crate::state::StepState;

/// Aggregated status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every step succeeded
    Succeeded,
    /// At least one step failed or is incomplete
    Failed,
    /// Cancelled before every step ran
    Cancelled,
}

/// Per-step entry of a run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub state: StepState,
    pub workers: usize,
    pub workers_succeeded: usize,
    pub workers_failed: usize,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl StepSummary {
    pub fn from_step(step: &Step) -> Self {
        Self {
            priority: step.priority(),
            label: step.label().map(str::to_string),
            state: step.state(),
            workers: step.worker_count(),
            workers_succeeded: step.succeeded_workers(),
            workers_failed: step.failed_workers(),
            attempts: step.attempts(),
            duration_ms: step.duration_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub status: RunStatus,

    pub step_count: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub steps_incomplete: usize,
    /// Steps that have not run (yet)
    pub steps_pending: usize,

    pub duration_ms: u64,

    pub steps: Vec<StepSummary>,

    pub human_summary: String,
}

impl RunSummary {
    /// Aggregate the given steps, which are expected in priority order.
    pub fn from_steps<'a>(
        run_id: &str,
        steps: impl IntoIterator<Item = &'a Step>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        cancelled: bool,
    ) -> Self {
        let steps: Vec<StepSummary> = steps.into_iter().map(StepSummary::from_step).collect();
        let count = |state: StepState| steps.iter().filter(|s| s.state == state).count();

        let steps_succeeded = count(StepState::Succeeded);
        let steps_failed = count(StepState::Failed);
        let steps_incomplete = count(StepState::Incomplete);
        let steps_pending = steps.len() - steps_succeeded - steps_failed - steps_incomplete;

        let status = if cancelled && steps_pending > 0 {
            RunStatus::Cancelled
        } else if steps_succeeded == steps.len() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        let duration_ms = match (started_at, finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        let mut summary = Self {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            started_at,
            finished_at,
            status,
            step_count: steps.len(),
            steps_succeeded,
            steps_failed,
            steps_incomplete,
            steps_pending,
            duration_ms,
            steps,
            human_summary: String::new(),
        };
        summary.human_summary = summary.generate_human_summary();
        summary
    }

    fn generate_human_summary(&self) -> String {
        if self.step_count == 0 {
            return "No steps queued".to_string();
        }
        match self.status {
            RunStatus::Succeeded => {
                format!("Run succeeded: {}/{} steps passed", self.steps_succeeded, self.step_count)
            }
            RunStatus::Failed => format!(
                "Run failed: {} succeeded, {} failed, {} incomplete, {} pending",
                self.steps_succeeded, self.steps_failed, self.steps_incomplete, self.steps_pending
            ),
            RunStatus::Cancelled => format!(
                "Run cancelled: {} step(s) finished, {} left pending",
                self.step_count - self.steps_pending,
                self.steps_pending
            ),
        }
    }

    /// Exit code for the CLI: 0 on success, 80 when cancelled, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Succeeded => 0,
            RunStatus::Cancelled => 80,
            RunStatus::Failed => 1,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.human_summary)?;
        for step in &self.steps {
            let name = match step.label {
                Some(ref label) => format!("{} ({})", step.priority, label),
                None => step.priority.to_string(),
            };
            writeln!(
                f,
                "  {:<24} {:<10} {}/{} workers ok, {} ms",
                name,
                step.state.as_str(),
                step.workers_succeeded,
                step.workers,
                step.duration_ms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::worker::Worker;
    use paralexe_exec::Executor;

    fn worker(id: usize, cmd: &str) -> Worker {
        Worker::new(id, Executor::local(cmd), None)
    }

    #[test]
    fn test_empty_summary() {
        let scheduler = Scheduler::new(1);
        let summary = scheduler.summary();
        assert_eq!(summary.step_count, 0);
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.human_summary, "No steps queued");
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_pending_steps_are_not_success() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(vec![worker(0, "true")], None, Some("later")).unwrap();
        let summary = scheduler.summary();
        assert_eq!(summary.steps_pending, 1);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.steps[0].label.as_deref(), Some("later"));
    }

    #[test]
    fn test_cancelled_summary() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(vec![worker(0, "true")], None, None).unwrap();
        scheduler.cancel_token().cancel();
        scheduler.submit();

        let summary = scheduler.summary();
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.exit_code(), 80);
        assert!(summary.human_summary.contains("1 left pending"));
    }

    #[cfg(unix)]
    #[test]
    fn test_summary_counts_and_json() {
        let mut scheduler = Scheduler::new(2);
        scheduler.queue(vec![worker(0, "true"), worker(1, "true")], None, Some("ok")).unwrap();
        scheduler.queue(
            vec![worker(0, "true"), worker(1, "sh -c 'echo ERROR 1>&2'")],
            None,
            None,
        )
        .unwrap();
        scheduler.submit();

        let summary = scheduler.summary();
        assert_eq!(summary.step_count, 2);
        assert_eq!(summary.steps_succeeded, 1);
        assert_eq!(summary.steps_incomplete, 1);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.steps[1].workers_failed, 1);
        assert_eq!(summary.exit_code(), 1);

        let parsed = RunSummary::from_json(&summary.to_json().unwrap()).unwrap();
        assert_eq!(parsed, summary);

        let text = summary.to_string();
        assert!(text.contains("0 (ok)"));
        assert!(text.contains("incomplete"));
    }
}
