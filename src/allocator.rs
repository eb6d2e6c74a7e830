//! Expands a manager's command template into one worker per job index.

use std::collections::BTreeSet;

use paralexe_exec::Executor;
use regex_lite::{Captures, Regex};

use crate::error::ManagerError;
use crate::job::Decorator;
use crate::manager::Manager;
use crate::worker::Worker;

/// Build the placeholder pattern for `decorator`.
///
/// Prefix and suffix are matched literally; names are non-empty and free of
/// whitespace.
fn placeholder_pattern(decorator: &Decorator) -> Result<Regex, ManagerError> {
    decorator.validate()?;
    let pattern = format!(
        r"{}(\S+?){}",
        regex_lite::escape(&decorator.prefix),
        regex_lite::escape(&decorator.suffix)
    );
    Regex::new(&pattern).map_err(|e| ManagerError::InvalidDecorator(e.to_string()))
}

/// Distinct placeholder names referenced by `template`.
pub fn placeholders(template: &str, decorator: &Decorator) -> Result<BTreeSet<String>, ManagerError> {
    let pattern = placeholder_pattern(decorator)?;
    Ok(pattern
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect())
}

pub struct JobAllocator<'a> {
    manager: &'a Manager,
}

impl<'a> JobAllocator<'a> {
    pub fn new(manager: &'a Manager) -> Self {
        Self { manager }
    }

    /// Resolve the template once per worker index.
    pub fn commands(&self) -> Result<Vec<String>, ManagerError> {
        let template = self.manager.cmd().ok_or(ManagerError::CommandNotSet)?;
        let decorator = self.manager.decorator();
        let pattern = placeholder_pattern(decorator)?;
        let args = self.manager.args();

        let found: BTreeSet<String> = pattern
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .collect();
        let registered: BTreeSet<String> = args.keys().cloned().collect();
        if found != registered {
            return Err(ManagerError::PlaceholderMismatch {
                missing: found.difference(&registered).cloned().collect(),
                unexpected: registered.difference(&found).cloned().collect(),
            });
        }

        let n_workers = self.manager.n_workers()?;
        let commands = (0..n_workers)
            .map(|index| {
                pattern
                    .replace_all(template, |caps: &Captures| {
                        // Every captured name is registered, checked above.
                        args.get(&caps[1])
                            .map(|value| value.value_at(index).to_string())
                            .unwrap_or_default()
                    })
                    .into_owned()
            })
            .collect();

        Ok(commands)
    }

    /// One worker per index, in index order.
    pub fn allocation(&self) -> Result<Vec<Worker>, ManagerError> {
        let commands = self.commands()?;
        let workers = commands
            .into_iter()
            .enumerate()
            .map(|(id, command)| {
                let executor = Executor::new(command, self.manager.backend().clone());
                Worker::new(id, executor, self.manager.meta(id))
            })
            .collect::<Vec<_>>();

        tracing::debug!(workers = workers.len(), "Allocated workers");
        Ok(workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ArgValue;

    #[test]
    fn test_placeholders_distinct_and_sorted() {
        let names = placeholders("cp *[src] *[dst] && ls *[dst]", &Decorator::default()).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["dst", "src"]);
    }

    #[test]
    fn test_placeholders_adjacent() {
        let names = placeholders("*[a]*[b]", &Decorator::default()).unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_placeholders_with_regex_metacharacters() {
        let decorator = Decorator::new("$(", ")").unwrap();
        let names = placeholders("echo $(x) (y) $(z)", &decorator).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["x", "z"]);
    }

    #[test]
    fn test_commands_substitute_each_index() {
        let mut manager = Manager::new("convert *[in] -resize *[size] out/*[in]");
        manager.set_arg("in", vec!["a.png", "b.png"]).unwrap();
        manager.set_arg("size", "50%").unwrap();

        let commands = JobAllocator::new(&manager).commands().unwrap();
        assert_eq!(
            commands,
            vec![
                "convert a.png -resize 50% out/a.png",
                "convert b.png -resize 50% out/b.png",
            ]
        );
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let mut manager = Manager::new("echo *[x]");
        manager.set_arg("x", ArgValue::list(["*[x]"])).unwrap();
        let commands = JobAllocator::new(&manager).commands().unwrap();
        assert_eq!(commands, vec!["echo *[x]"]);
    }

    #[test]
    fn test_missing_argument_is_reported() {
        let mut manager = Manager::new("echo *[a] *[b]");
        manager.set_arg("a", "1").unwrap();
        manager.set_arg("c", "3").unwrap();

        let err = JobAllocator::new(&manager).allocation().unwrap_err();
        assert_eq!(
            err,
            ManagerError::PlaceholderMismatch {
                missing: vec!["b".to_string()],
                unexpected: vec!["c".to_string()],
            }
        );
    }

    #[test]
    fn test_template_required() {
        let manager = Manager::default();
        assert_eq!(
            JobAllocator::new(&manager).allocation().unwrap_err(),
            ManagerError::CommandNotSet
        );
    }

    #[test]
    fn test_workers_carry_ids_and_meta() {
        let mut manager = Manager::new("echo *[x]");
        manager.set_arg_with_meta("x", vec!["p", "q"]).unwrap();

        let workers = JobAllocator::new(&manager).allocation().unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[1].id(), 1);
        assert_eq!(workers[1].cmd(), "echo q");
        assert_eq!(
            workers[1].meta().and_then(|m| m.get("x")).map(String::as_str),
            Some("q")
        );
    }
}
