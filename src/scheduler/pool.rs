//! Bounded worker pool for one step.
//!
//! A fresh set of threads is created per step. Workers are pulled from a
//! shared queue, results come back over a channel in completion order.
//! Every task is guarded: an executor error or a panic becomes a failure
//! report for that worker and the pool thread moves on.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Instant;

use paralexe_exec::ExecOptions;

use super::step::WorkerReport;
use crate::worker::{ClassifyPolicy, Worker};

/// Run `workers` on at most `n_threads` threads and collect their reports.
///
/// Reports are returned in completion order. Workers are dropped once their
/// report is sent.
pub(crate) fn run_workers(
    workers: Vec<Worker>,
    n_threads: usize,
    options: &ExecOptions,
    policy: &ClassifyPolicy,
) -> Vec<WorkerReport> {
    if workers.is_empty() {
        return Vec::new();
    }

    let n_threads = n_threads.clamp(1, workers.len());
    let queue = Mutex::new(VecDeque::from(workers));
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..n_threads {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                let next = match queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some(mut worker) = next else { break };

                let report = if options.cancel.is_cancelled() {
                    WorkerReport::failure(&worker, "cancelled before start")
                } else {
                    run_guarded(&mut worker, options, policy)
                };
                if tx.send(report).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        rx.iter()
            .inspect(|report| {
                if report.succeeded() {
                    tracing::debug!(worker_id = report.id, "Worker succeeded");
                } else {
                    tracing::warn!(
                        worker_id = report.id,
                        command = %report.command,
                        error = report.error.as_deref().unwrap_or("error token on stderr"),
                        "Worker failed"
                    );
                }
            })
            .collect()
    })
}

fn run_guarded(worker: &mut Worker, options: &ExecOptions, policy: &ClassifyPolicy) -> WorkerReport {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(options, policy)));
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => WorkerReport::from_run(worker, result, duration_ms),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            WorkerReport::failure(worker, format!("worker panicked: {}", message))
        }
    }
}
