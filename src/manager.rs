//! Manager: collects a command template, its arguments and per-worker
//! metadata, and turns them into workers.
//!
//! ```no_run
//! use paralexe::{Manager, Scheduler};
//!
//! let mut scheduler = Scheduler::default();
//! let mut manager = Manager::new("gzip -k *[file]");
//! manager.set_arg("file", vec!["a.txt", "b.txt"])?;
//! manager.schedule(&mut scheduler, None, Some("compress"))?;
//! scheduler.submit();
//! # Ok::<(), paralexe::ManagerError>(())
//! ```

use std::collections::BTreeMap;

use paralexe_exec::Backend;

use crate::allocator::JobAllocator;
use crate::error::ManagerError;
use crate::job::{ArgValue, Decorator, Meta};
use crate::scheduler::{QueueOutcome, Scheduler};
use crate::worker::Worker;

#[derive(Debug, Clone, Default)]
pub struct Manager {
    template: Option<String>,
    decorator: Decorator,
    args: BTreeMap<String, ArgValue>,
    meta: BTreeMap<String, ArgValue>,
    backend: Backend,
}

impl Manager {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            ..Self::default()
        }
    }

    /// Set (or replace) the command template.
    pub fn set_cmd(&mut self, template: impl Into<String>) -> &mut Self {
        self.template = Some(template.into());
        self
    }

    pub fn set_decorator(
        &mut self,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Result<&mut Self, ManagerError> {
        self.decorator = Decorator::new(prefix, suffix)?;
        Ok(self)
    }

    /// Backend every worker's executor runs on.
    pub fn set_backend(&mut self, backend: Backend) -> &mut Self {
        self.backend = backend;
        self
    }

    /// Register the value(s) for placeholder `label`.
    ///
    /// A list must match the length of every list registered before it.
    pub fn set_arg(
        &mut self,
        label: impl Into<String>,
        value: impl Into<ArgValue>,
    ) -> Result<&mut Self, ManagerError> {
        let label = label.into();
        let value = value.into();
        self.check_length(&label, &value)?;
        self.args.insert(label, value);
        Ok(self)
    }

    /// Register an argument and record its values as metadata of the same
    /// label.
    pub fn set_arg_with_meta(
        &mut self,
        label: impl Into<String>,
        value: impl Into<ArgValue>,
    ) -> Result<&mut Self, ManagerError> {
        let label = label.into();
        let value = value.into();
        self.check_length(&label, &value)?;
        self.meta.insert(label.clone(), value.clone());
        self.args.insert(label, value);
        Ok(self)
    }

    /// Record per-worker metadata without a placeholder.
    ///
    /// Metadata columns merge; registering arguments never clears them.
    pub fn set_meta(
        &mut self,
        label: impl Into<String>,
        value: impl Into<ArgValue>,
    ) -> Result<&mut Self, ManagerError> {
        let label = label.into();
        let value = value.into();
        self.check_length(&label, &value)?;
        self.meta.insert(label, value);
        Ok(self)
    }

    fn check_length(&self, label: &str, value: &ArgValue) -> Result<(), ManagerError> {
        let Some(found) = value.list_len() else {
            return Ok(());
        };
        if found == 0 {
            return Err(ManagerError::EmptyArgList(label.to_string()));
        }

        // A label being replaced does not constrain its own new value.
        let expected = self
            .args
            .iter()
            .chain(self.meta.iter())
            .filter(|(l, _)| l.as_str() != label)
            .find_map(|(_, v)| v.list_len());
        match expected {
            Some(expected) if expected != found => Err(ManagerError::ArgLengthMismatch {
                label: label.to_string(),
                expected,
                found,
            }),
            _ => Ok(()),
        }
    }

    /// Number of workers implied by the registered lists.
    ///
    /// Argument and metadata lists all count and must agree; only scalars
    /// means one worker.
    pub fn n_workers(&self) -> Result<usize, ManagerError> {
        let mut n_workers: Option<usize> = None;

        let columns = self
            .args
            .iter()
            .map(|column| (column, false))
            .chain(self.meta.iter().map(|column| (column, true)));
        for ((label, value), is_meta) in columns {
            let Some(len) = value.list_len() else { continue };
            if len == 0 {
                return Err(ManagerError::EmptyArgList(label.clone()));
            }
            match n_workers {
                None => n_workers = Some(len),
                Some(expected) if expected != len => {
                    let label = label.clone();
                    return Err(if is_meta {
                        ManagerError::MetaLengthMismatch {
                            label,
                            expected,
                            found: len,
                        }
                    } else {
                        ManagerError::ArgLengthMismatch {
                            label,
                            expected,
                            found: len,
                        }
                    });
                }
                Some(_) => {}
            }
        }

        Ok(n_workers.unwrap_or(1))
    }

    /// Metadata of worker `index`; `None` when no metadata is registered.
    pub fn meta(&self, index: usize) -> Option<Meta> {
        if self.meta.is_empty() {
            return None;
        }
        Some(
            self.meta
                .iter()
                .map(|(label, value)| (label.clone(), value.value_at(index).to_string()))
                .collect(),
        )
    }

    pub fn cmd(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn decorator(&self) -> &Decorator {
        &self.decorator
    }

    pub fn args(&self) -> &BTreeMap<String, ArgValue> {
        &self.args
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Build a fresh set of workers.
    pub fn deploy_jobs(&self) -> Result<Vec<Worker>, ManagerError> {
        JobAllocator::new(self).allocation()
    }

    /// Build workers and queue them as one step.
    pub fn schedule(
        &self,
        scheduler: &mut Scheduler,
        priority: Option<i64>,
        label: Option<&str>,
    ) -> Result<QueueOutcome, ManagerError> {
        let workers = self.deploy_jobs()?;
        Ok(scheduler.queue(workers, priority, label)?)
    }
}
