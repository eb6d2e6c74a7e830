//! Job files: a TOML list of steps, each a command template with its
//! arguments.
//!
//! ```toml
//! [[step]]
//! label = "align"
//! priority = 0
//! cmd = "bwa mem *[ref] *[sample].fq"
//! [step.args]
//! ref = "hg38.fa"
//! sample = ["s1", "s2"]
//! [step.meta]
//! subject = ["A", "B"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use paralexe_exec::Backend;
use serde::Deserialize;

use crate::allocator::JobAllocator;
use crate::error::ManagerError;
use crate::job::{ArgValue, Decorator};
use crate::manager::Manager;
use crate::scheduler::{QueueOutcome, Scheduler};
use crate::worker::Worker;

#[derive(Debug, thiserror::Error)]
pub enum JobFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("step {step}: {key:?} has unsupported value type {kind}")]
    UnsupportedValue {
        step: usize,
        key: String,
        kind: &'static str,
    },

    #[error("step {step}: {source}")]
    Manager {
        step: usize,
        #[source]
        source: ManagerError,
    },
}

/// One `[[step]]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    pub cmd: String,
    /// `[prefix, suffix]`
    #[serde(default)]
    pub decorator: Option<(String, String)>,
    #[serde(default)]
    pub args: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub meta: BTreeMap<String, toml::Value>,
}

/// Commands one step would run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub index: usize,
    pub label: Option<String>,
    pub priority: Option<i64>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
}

impl JobFile {
    pub fn from_path(path: &Path) -> Result<Self, JobFileError> {
        let contents = fs::read_to_string(path).map_err(|source| JobFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, JobFileError> {
        Ok(toml::from_str(contents)?)
    }

    /// Build one manager per step. Steps without their own decorator use
    /// `decorator`.
    pub fn managers(
        &self,
        decorator: &Decorator,
        backend: &Backend,
    ) -> Result<Vec<Manager>, JobFileError> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| step.manager(index, decorator, backend))
            .collect()
    }

    /// Resolve every step's commands without running anything.
    pub fn plan(
        &self,
        decorator: &Decorator,
        backend: &Backend,
    ) -> Result<Vec<PlannedStep>, JobFileError> {
        let managers = self.managers(decorator, backend)?;
        self.steps
            .iter()
            .zip(&managers)
            .enumerate()
            .map(|(index, (step, manager))| {
                let commands = JobAllocator::new(manager)
                    .commands()
                    .map_err(|source| JobFileError::Manager { step: index, source })?;
                Ok(PlannedStep {
                    index,
                    label: step.label.clone(),
                    priority: step.priority,
                    commands,
                })
            })
            .collect()
    }

    /// Queue every step in file order.
    ///
    /// Workers for all steps are built before the first one is queued, so a
    /// step that fails to build leaves the scheduler untouched.
    pub fn schedule(
        &self,
        scheduler: &mut Scheduler,
        decorator: &Decorator,
        backend: &Backend,
    ) -> Result<Vec<QueueOutcome>, JobFileError> {
        let managers = self.managers(decorator, backend)?;
        let deployed: Vec<Vec<Worker>> = managers
            .iter()
            .enumerate()
            .map(|(index, manager)| {
                manager
                    .deploy_jobs()
                    .map_err(|source| JobFileError::Manager { step: index, source })
            })
            .collect::<Result<_, _>>()?;

        self.steps
            .iter()
            .zip(deployed)
            .enumerate()
            .map(|(index, (step, workers))| {
                scheduler
                    .queue(workers, step.priority, step.label.as_deref())
                    .map_err(|e| JobFileError::Manager {
                        step: index,
                        source: e.into(),
                    })
            })
            .collect()
    }
}

impl StepSpec {
    fn manager(
        &self,
        index: usize,
        decorator: &Decorator,
        backend: &Backend,
    ) -> Result<Manager, JobFileError> {
        let wrap = |source| JobFileError::Manager { step: index, source };

        let mut manager = Manager::new(self.cmd.as_str());
        manager.set_backend(backend.clone());
        match self.decorator {
            Some((ref prefix, ref suffix)) => {
                manager
                    .set_decorator(prefix.as_str(), suffix.as_str())
                    .map_err(wrap)?;
            }
            None => {
                manager
                    .set_decorator(decorator.prefix.as_str(), decorator.suffix.as_str())
                    .map_err(wrap)?;
            }
        }

        for (key, value) in &self.args {
            let value = arg_value(index, key, value)?;
            manager.set_arg(key.as_str(), value).map_err(wrap)?;
        }
        for (key, value) in &self.meta {
            let value = arg_value(index, key, value)?;
            manager.set_meta(key.as_str(), value).map_err(wrap)?;
        }
        Ok(manager)
    }
}

fn scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn arg_value(step: usize, key: &str, value: &toml::Value) -> Result<ArgValue, JobFileError> {
    let unsupported = |v: &toml::Value| JobFileError::UnsupportedValue {
        step,
        key: key.to_string(),
        kind: v.type_str(),
    };

    match value {
        toml::Value::Array(items) => items
            .iter()
            .map(|item| scalar(item).ok_or_else(|| unsupported(item)))
            .collect::<Result<Vec<_>, _>>()
            .map(ArgValue::List),
        other => scalar(other).map(ArgValue::Scalar).ok_or_else(|| unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerError;

    const PIPELINE: &str = r#"
[[step]]
label = "align"
cmd = "bwa mem *[ref] *[sample].fq"
[step.args]
ref = "hg38.fa"
sample = ["s1", "s2"]
[step.meta]
subject = ["A", "B"]

[[step]]
priority = 10
cmd = "merge --threads {{n}}"
decorator = ["{{", "}}"]
[step.args]
n = 4
"#;

    #[test]
    fn test_parse_steps() {
        let file = JobFile::parse(PIPELINE).unwrap();
        assert_eq!(file.steps.len(), 2);
        assert_eq!(file.steps[0].label.as_deref(), Some("align"));
        assert_eq!(file.steps[0].priority, None);
        assert_eq!(file.steps[1].priority, Some(10));
        assert_eq!(
            file.steps[1].decorator,
            Some(("{{".to_string(), "}}".to_string()))
        );
    }

    #[test]
    fn test_plan_resolves_commands() {
        let file = JobFile::parse(PIPELINE).unwrap();
        let plan = file.plan(&Decorator::default(), &Backend::Local).unwrap();

        assert_eq!(
            plan[0].commands,
            vec!["bwa mem hg38.fa s1.fq", "bwa mem hg38.fa s2.fq"]
        );
        assert_eq!(plan[1].commands, vec!["merge --threads 4"]);
    }

    #[test]
    fn test_meta_reaches_workers() {
        let file = JobFile::parse(PIPELINE).unwrap();
        let managers = file.managers(&Decorator::default(), &Backend::Local).unwrap();
        let workers = managers[0].deploy_jobs().unwrap();
        assert_eq!(
            workers[1].meta().and_then(|m| m.get("subject")).map(String::as_str),
            Some("B")
        );
    }

    #[test]
    fn test_schedule_priorities() {
        let file = JobFile::parse(PIPELINE).unwrap();
        let mut scheduler = Scheduler::new(1);
        let outcomes = file
            .schedule(&mut scheduler, &Decorator::default(), &Backend::Local)
            .unwrap();

        assert_eq!(
            outcomes,
            vec![
                QueueOutcome::Queued { priority: 0 },
                QueueOutcome::Queued { priority: 10 },
            ]
        );
        assert_eq!(scheduler.priority_of("align"), Some(0));
        assert_eq!(scheduler.step(0).unwrap().worker_count(), 2);
    }

    #[test]
    fn test_bad_step_queues_nothing() {
        let file = JobFile::parse(
            r#"
[[step]]
cmd = "echo ok"

[[step]]
cmd = "echo *[missing]"
"#,
        )
        .unwrap();

        let mut scheduler = Scheduler::new(1);
        let err = file
            .schedule(&mut scheduler, &Decorator::default(), &Backend::Local)
            .unwrap_err();
        assert!(matches!(
            err,
            JobFileError::Manager {
                step: 1,
                source: ManagerError::PlaceholderMismatch { .. }
            }
        ));
        assert_eq!(scheduler.check_progress().total, 0);
    }

    #[test]
    fn test_priority_overflow_reports_step() {
        let file = JobFile::parse(
            r#"
[[step]]
priority = 9223372036854775807
cmd = "true"

[[step]]
cmd = "true"
"#,
        )
        .unwrap();

        let mut scheduler = Scheduler::new(1);
        let err = file
            .schedule(&mut scheduler, &Decorator::default(), &Backend::Local)
            .unwrap_err();
        assert!(matches!(
            err,
            JobFileError::Manager {
                step: 1,
                source: ManagerError::Schedule(SchedulerError::PriorityOverflow { .. })
            }
        ));
    }

    #[test]
    fn test_length_mismatch_reports_step() {
        let file = JobFile::parse(
            r#"
[[step]]
cmd = "cp *[a] *[b]"
[step.args]
a = ["1", "2"]
b = ["1"]
"#,
        )
        .unwrap();
        let err = file.managers(&Decorator::default(), &Backend::Local).unwrap_err();
        assert!(err.to_string().starts_with("step 0:"));
    }

    #[test]
    fn test_scalar_types() {
        let file = JobFile::parse(
            r#"
[[step]]
cmd = "run *[a] *[b] *[c]"
[step.args]
a = 1.5
b = true
c = [1, 2]
"#,
        )
        .unwrap();
        let plan = file.plan(&Decorator::default(), &Backend::Local).unwrap();
        assert_eq!(plan[0].commands, vec!["run 1.5 true 1", "run 1.5 true 2"]);
    }

    #[test]
    fn test_nested_table_rejected() {
        let file = JobFile::parse(
            r#"
[[step]]
cmd = "run *[a]"
[step.args.a]
x = 1
"#,
        )
        .unwrap();
        let err = file.managers(&Decorator::default(), &Backend::Local).unwrap_err();
        assert!(matches!(
            err,
            JobFileError::UnsupportedValue { kind: "table", .. }
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            JobFile::parse("[[step]]\ncmd = \"true\"\nthreads = 2\n"),
            Err(JobFileError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            JobFile::from_path(Path::new("/nonexistent/jobs.toml")),
            Err(JobFileError::Io { .. })
        ));
    }
}
