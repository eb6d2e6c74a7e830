//! Priority-ordered step scheduler
//!
//! Steps run one at a time in ascending priority. The workers of a step run
//! concurrently on a fresh bounded pool; the step is classified once every
//! worker has reported. Scheduler state is only written by the thread that
//! owns the submission.

mod pool;
mod step;

pub use step::{Step, WorkerReport};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use paralexe_exec::{CancelToken, ExecOptions, TimeoutConfig};
use serde::Serialize;

use crate::state::StepState;
use crate::summary::RunSummary;
use crate::worker::{ClassifyPolicy, Worker};

/// Pool size used when nothing else is configured.
pub fn default_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Scheduler-wide execution settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pool size for each step
    pub n_threads: usize,
    pub timeout: TimeoutConfig,
    pub policy: ClassifyPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            n_threads: default_threads(),
            timeout: TimeoutConfig::default(),
            policy: ClassifyPolicy::default(),
        }
    }
}

/// What `queue()` did with the given workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// New step created
    Queued { priority: i64 },
    /// Failed or incomplete step reset to pending with new workers
    Requeued { priority: i64 },
    /// Pending step's workers replaced
    Replaced { priority: i64 },
    /// Step already succeeded; workers dropped
    Skipped { priority: i64 },
}

impl QueueOutcome {
    pub fn priority(&self) -> i64 {
        match *self {
            QueueOutcome::Queued { priority }
            | QueueOutcome::Requeued { priority }
            | QueueOutcome::Replaced { priority }
            | QueueOutcome::Skipped { priority } => priority,
        }
    }
}

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: Vec<i64>,
    pub running: Option<i64>,
    pub succeeded: Vec<i64>,
    pub failed: Vec<i64>,
    pub incomplete: Vec<i64>,
    pub cancelled: bool,
}

impl Progress {
    /// Steps that reached an outcome.
    pub fn done(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.incomplete.len()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.running.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Submission thread panicked")]
    Panicked,

    #[error("no priority left after {max}; give the step an explicit priority")]
    PriorityOverflow { max: i64 },
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    steps: BTreeMap<i64, Step>,
    labels: HashMap<String, i64>,
    succeeded: BTreeSet<i64>,
    failed: BTreeSet<i64>,
    incomplete: BTreeSet<i64>,
    cancel: CancelToken,
    progress: Option<Arc<Mutex<Progress>>>,
    run_id: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::with_config(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Scheduler with `n_threads` workers per step and default settings
    /// otherwise.
    pub fn new(n_threads: usize) -> Self {
        Self::with_config(SchedulerConfig {
            n_threads,
            ..SchedulerConfig::default()
        })
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            steps: BTreeMap::new(),
            labels: HashMap::new(),
            succeeded: BTreeSet::new(),
            failed: BTreeSet::new(),
            incomplete: BTreeSet::new(),
            cancel: CancelToken::new(),
            progress: None,
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register `workers` as a step.
    ///
    /// An existing step is looked up by label first, then by priority. A
    /// succeeded step is never rerun. Without an existing step the priority
    /// defaults to one past the highest queued priority (0 when empty).
    pub fn queue(
        &mut self,
        workers: Vec<Worker>,
        priority: Option<i64>,
        label: Option<&str>,
    ) -> Result<QueueOutcome, SchedulerError> {
        let existing = label
            .and_then(|l| self.labels.get(l).copied())
            .or_else(|| priority.filter(|p| self.steps.contains_key(p)));

        let Some(priority) = existing else {
            let priority = match priority {
                Some(priority) => priority,
                None => self.next_priority()?,
            };
            tracing::debug!(priority, label, workers = workers.len(), "Queued step");
            self.steps
                .insert(priority, Step::new(priority, label.map(str::to_string), workers));
            if let Some(label) = label {
                self.labels.insert(label.to_string(), priority);
            }
            return Ok(QueueOutcome::Queued { priority });
        };

        let Some(step) = self.steps.get_mut(&priority) else {
            return Ok(QueueOutcome::Skipped { priority });
        };
        let previous = step.state();
        if previous == StepState::Succeeded {
            tracing::info!(priority, label = %step.display_name(), "Step already succeeded, skipping");
            return Ok(QueueOutcome::Skipped { priority });
        }

        let old_label = step.label().map(str::to_string);
        if let Err(e) = step.requeue(workers, label.map(str::to_string)) {
            tracing::warn!(priority, error = %e, "Cannot requeue step");
            return Ok(QueueOutcome::Skipped { priority });
        }
        if let Some(label) = label {
            if let Some(old) = old_label.filter(|old| old != label) {
                self.labels.remove(&old);
            }
            self.labels.insert(label.to_string(), priority);
        }

        if previous == StepState::Pending {
            tracing::debug!(priority, "Replaced pending step");
            Ok(QueueOutcome::Replaced { priority })
        } else {
            self.failed.remove(&priority);
            self.incomplete.remove(&priority);
            tracing::info!(priority, previous = %previous, "Requeued step");
            Ok(QueueOutcome::Requeued { priority })
        }
    }

    /// One past the highest queued priority, 0 when empty.
    fn next_priority(&self) -> Result<i64, SchedulerError> {
        match self.steps.keys().next_back() {
            Some(&max) => max
                .checked_add(1)
                .ok_or(SchedulerError::PriorityOverflow { max }),
            None => Ok(0),
        }
    }

    /// Register several unlabelled steps at once.
    pub fn queue_steps(
        &mut self,
        steps: BTreeMap<i64, Vec<Worker>>,
    ) -> Result<Vec<QueueOutcome>, SchedulerError> {
        steps
            .into_iter()
            .map(|(priority, workers)| self.queue(workers, Some(priority), None))
            .collect()
    }

    /// Run every pending step in ascending priority on the calling thread.
    ///
    /// Step failures do not stop the run; inspect the outcome sets afterwards.
    /// After cancellation no further step starts and those steps stay pending.
    pub fn submit(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        let options = ExecOptions::from_timeout(&self.config.timeout, self.cancel.clone());

        let pending: Vec<i64> = self
            .steps
            .iter()
            .filter(|(_, step)| step.state() == StepState::Pending)
            .map(|(priority, _)| *priority)
            .collect();

        tracing::info!(run_id = %self.run_id, steps = pending.len(), threads = self.config.n_threads, "Submitting");
        for priority in pending {
            if self.cancel.is_cancelled() {
                tracing::warn!(priority, "Cancelled, remaining steps left pending");
                break;
            }
            self.run_step(priority, &options);
        }

        self.finished_at = Some(Utc::now());
        self.publish();
    }

    fn run_step(&mut self, priority: i64, options: &ExecOptions) {
        let Some(step) = self.steps.get_mut(&priority) else {
            return;
        };
        let name = step.display_name();
        if let Err(e) = step.transition(StepState::Running) {
            tracing::error!(priority, label = %name, error = %e, "Cannot start step");
            return;
        }
        let workers = step.take_workers();
        tracing::info!(priority, label = %name, workers = workers.len(), "Running step");
        self.publish();

        let reports = pool::run_workers(workers, self.config.n_threads, options, &self.config.policy);

        let Some(step) = self.steps.get_mut(&priority) else {
            return;
        };
        match step.finish(reports) {
            Ok(outcome) => {
                match outcome {
                    StepState::Succeeded => self.succeeded.insert(priority),
                    StepState::Failed => self.failed.insert(priority),
                    _ => self.incomplete.insert(priority),
                };
                tracing::info!(
                    priority,
                    label = %name,
                    outcome = %outcome,
                    succeeded = step.succeeded_workers(),
                    failed = step.failed_workers(),
                    "Step finished"
                );
            }
            Err(e) => {
                tracing::error!(priority, label = %name, error = %e, "Abandoning step");
            }
        }
        self.publish();
    }

    /// Move the scheduler onto a background thread and submit there.
    pub fn spawn(mut self) -> io::Result<SubmitHandle> {
        let progress = Arc::new(Mutex::new(self.check_progress()));
        self.progress = Some(Arc::clone(&progress));
        let cancel = self.cancel.clone();

        let handle = thread::Builder::new()
            .name("paralexe-submit".to_string())
            .spawn(move || {
                self.submit();
                self
            })?;

        Ok(SubmitHandle {
            handle,
            progress,
            cancel,
        })
    }

    fn publish(&self) {
        if let Some(ref shared) = self.progress {
            let snapshot = self.check_progress();
            match shared.lock() {
                Ok(mut progress) => *progress = snapshot,
                Err(poisoned) => *poisoned.into_inner() = snapshot,
            }
        }
    }

    pub fn check_progress(&self) -> Progress {
        let mut progress = Progress {
            total: self.steps.len(),
            succeeded: self.succeeded.iter().copied().collect(),
            failed: self.failed.iter().copied().collect(),
            incomplete: self.incomplete.iter().copied().collect(),
            cancelled: self.cancel.is_cancelled(),
            ..Progress::default()
        };
        for (priority, step) in &self.steps {
            match step.state() {
                StepState::Pending => progress.pending.push(*priority),
                StepState::Running => progress.running = Some(*priority),
                _ => {}
            }
        }
        progress
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_steps(
            &self.run_id,
            self.steps.values(),
            self.started_at,
            self.finished_at,
            self.cancel.is_cancelled(),
        )
    }

    /// Token that cancels this scheduler's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn step(&self, priority: i64) -> Option<&Step> {
        self.steps.get(&priority)
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn priority_of(&self, label: &str) -> Option<i64> {
        self.labels.get(label).copied()
    }

    pub fn succeeded(&self) -> &BTreeSet<i64> {
        &self.succeeded
    }

    pub fn failed(&self) -> &BTreeSet<i64> {
        &self.failed
    }

    pub fn incomplete(&self) -> &BTreeSet<i64> {
        &self.incomplete
    }

    /// Whether every queued step succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded.len() == self.steps.len()
    }

    /// Per-worker results of a step, ordered by worker id.
    pub fn results(&self, priority: i64) -> Option<&[WorkerReport]> {
        self.steps.get(&priority).map(Step::reports)
    }

    pub fn stdout(&self, priority: i64) -> Option<Vec<Option<&[String]>>> {
        self.results(priority)
            .map(|reports| reports.iter().map(|r| r.stdout.as_deref()).collect())
    }

    pub fn stderr(&self, priority: i64) -> Option<Vec<Option<&[String]>>> {
        self.results(priority)
            .map(|reports| reports.iter().map(|r| r.stderr.as_deref()).collect())
    }
}

/// Handle to a submission running on a background thread.
#[derive(Debug)]
pub struct SubmitHandle {
    handle: JoinHandle<Scheduler>,
    progress: Arc<Mutex<Progress>>,
    cancel: CancelToken,
}

impl SubmitHandle {
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Latest progress published by the submission thread.
    pub fn check_progress(&self) -> Progress {
        match self.progress.lock() {
            Ok(progress) => progress.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the submission and take the scheduler back.
    pub fn join(self) -> Result<Scheduler, SchedulerError> {
        self.handle.join().map_err(|_| SchedulerError::Panicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paralexe_exec::Executor;

    fn workers(commands: &[&str]) -> Vec<Worker> {
        commands
            .iter()
            .enumerate()
            .map(|(id, cmd)| Worker::new(id, Executor::local(*cmd), None))
            .collect()
    }

    #[test]
    fn test_default_priorities_increment() {
        let mut scheduler = Scheduler::new(1);
        assert_eq!(
            scheduler.queue(workers(&["true"]), None, None).unwrap(),
            QueueOutcome::Queued { priority: 0 }
        );
        assert_eq!(
            scheduler.queue(workers(&["true"]), Some(10), None).unwrap(),
            QueueOutcome::Queued { priority: 10 }
        );
        assert_eq!(
            scheduler.queue(workers(&["true"]), None, None).unwrap(),
            QueueOutcome::Queued { priority: 11 }
        );
    }

    #[test]
    fn test_negative_priority_is_kept() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), Some(-3), None).unwrap();
        assert_eq!(
            scheduler.queue(workers(&["true"]), None, None).unwrap(),
            QueueOutcome::Queued { priority: -2 }
        );
    }

    #[test]
    fn test_default_priority_overflow_is_an_error() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), Some(i64::MAX), None).unwrap();
        assert_eq!(
            scheduler.queue(workers(&["true"]), None, None),
            Err(SchedulerError::PriorityOverflow { max: i64::MAX })
        );
        assert_eq!(scheduler.check_progress().total, 1);

        // An explicit priority still works.
        assert_eq!(
            scheduler.queue(workers(&["true"]), Some(i64::MIN), None),
            Ok(QueueOutcome::Queued { priority: i64::MIN })
        );
    }

    #[test]
    fn test_pending_step_is_replaced() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), Some(0), Some("a")).unwrap();
        let outcome = scheduler.queue(workers(&["true", "true"]), None, Some("a")).unwrap();
        assert_eq!(outcome, QueueOutcome::Replaced { priority: 0 });
        assert_eq!(scheduler.step(0).unwrap().worker_count(), 2);
    }

    #[test]
    fn test_label_wins_over_priority() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), Some(4), Some("a")).unwrap();
        let outcome = scheduler.queue(workers(&["true"]), Some(9), Some("a")).unwrap();
        assert_eq!(outcome.priority(), 4);
        assert!(scheduler.step(9).is_none());
    }

    #[test]
    fn test_relabel_by_priority() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), Some(1), Some("old")).unwrap();
        scheduler.queue(workers(&["true"]), Some(1), Some("new")).unwrap();
        assert_eq!(scheduler.priority_of("new"), Some(1));
        assert_eq!(scheduler.priority_of("old"), None);
    }

    #[test]
    fn test_queue_steps_bulk() {
        let mut scheduler = Scheduler::new(1);
        let mut steps = BTreeMap::new();
        steps.insert(5, workers(&["true"]));
        steps.insert(2, workers(&["true", "true"]));
        let outcomes = scheduler.queue_steps(steps).unwrap();
        assert_eq!(
            outcomes,
            vec![
                QueueOutcome::Queued { priority: 2 },
                QueueOutcome::Queued { priority: 5 },
            ]
        );
        assert_eq!(scheduler.check_progress().pending, vec![2, 5]);
    }

    #[test]
    fn test_progress_before_submit() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), None, None).unwrap();
        let progress = scheduler.check_progress();
        assert_eq!(progress.total, 1);
        assert_eq!(progress.done(), 0);
        assert!(!progress.is_finished());
    }

    #[test]
    fn test_empty_step_fails() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(Vec::new(), None, Some("nothing")).unwrap();
        scheduler.submit();
        assert!(scheduler.failed().contains(&0));
        assert_eq!(scheduler.results(0).map(<[_]>::len), Some(0));
    }

    #[test]
    fn test_cancelled_before_submit_leaves_pending() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), None, None).unwrap();
        scheduler.cancel_token().cancel();
        scheduler.submit();

        let progress = scheduler.check_progress();
        assert_eq!(progress.pending, vec![0]);
        assert!(progress.cancelled);
        assert_eq!(scheduler.step(0).unwrap().attempts(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_outcome_sets_are_disjoint() {
        let mut scheduler = Scheduler::new(2);
        scheduler.queue(workers(&["true", "true"]), None, None).unwrap();
        scheduler.queue(workers(&["sh -c 'echo ERROR 1>&2'"]), None, None).unwrap();
        scheduler.queue(workers(&["true", "sh -c 'echo ERROR 1>&2'"]), None, None).unwrap();
        scheduler.submit();

        assert_eq!(scheduler.succeeded().iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(scheduler.failed().iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(scheduler.incomplete().iter().copied().collect::<Vec<_>>(), vec![2]);
        assert!(scheduler.check_progress().is_finished());
        assert!(!scheduler.all_succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn test_succeeded_step_is_skipped() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["true"]), None, Some("once")).unwrap();
        scheduler.submit();

        let outcome = scheduler.queue(workers(&["false"]), None, Some("once")).unwrap();
        assert_eq!(outcome, QueueOutcome::Skipped { priority: 0 });
        scheduler.submit();
        assert_eq!(scheduler.step(0).unwrap().attempts(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_step_is_requeued() {
        let mut scheduler = Scheduler::new(1);
        scheduler.queue(workers(&["sh -c 'echo ERROR 1>&2'"]), None, Some("flaky")).unwrap();
        scheduler.submit();
        assert!(scheduler.failed().contains(&0));

        let outcome = scheduler.queue(workers(&["true"]), None, Some("flaky")).unwrap();
        assert_eq!(outcome, QueueOutcome::Requeued { priority: 0 });
        assert!(scheduler.failed().is_empty());

        scheduler.submit();
        assert!(scheduler.succeeded().contains(&0));
        assert_eq!(scheduler.step(0).unwrap().attempts(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_background_submit() {
        let mut scheduler = Scheduler::new(2);
        scheduler.queue(workers(&["echo one", "echo two"]), None, None).unwrap();

        let handle = scheduler.spawn().unwrap();
        let scheduler = handle.join().unwrap();
        assert!(scheduler.all_succeeded());

        let stdout = scheduler.stdout(0).unwrap();
        assert_eq!(stdout[0], Some(&["one".to_string()][..]));
        assert_eq!(stdout[1], Some(&["two".to_string()][..]));
    }
}
