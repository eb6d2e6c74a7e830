//! Job file integration tests

use std::fs;

use paralexe::{Backend, Decorator, JobFile, JobFileError, Scheduler};

#[test]
fn test_load_and_plan_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.toml");
    fs::write(
        &path,
        r#"
[[step]]
label = "compress"
cmd = "gzip -k *[file]"
[step.args]
file = ["a.txt", "b.txt"]

[[step]]
label = "index"
cmd = "ls *[dir]"
[step.args]
dir = "."
"#,
    )
    .unwrap();

    let file = JobFile::from_path(&path).unwrap();
    let plan = file.plan(&Decorator::default(), &Backend::Local).unwrap();

    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].label.as_deref(), Some("compress"));
    assert_eq!(plan[0].commands, vec!["gzip -k a.txt", "gzip -k b.txt"]);
    assert_eq!(plan[1].commands, vec!["ls ."]);
}

#[test]
fn test_default_decorator_from_config() {
    let file = JobFile::parse(
        r#"
[[step]]
cmd = "echo %x%"
[step.args]
x = "hi"
"#,
    )
    .unwrap();
    let decorator = Decorator::new("%", "%").unwrap();
    let plan = file.plan(&decorator, &Backend::Local).unwrap();
    assert_eq!(plan[0].commands, vec!["echo hi"]);
}

#[test]
fn test_empty_file_has_no_steps() {
    let file = JobFile::parse("").unwrap();
    let mut scheduler = Scheduler::new(1);
    let outcomes = file
        .schedule(&mut scheduler, &Decorator::default(), &Backend::Local)
        .unwrap();
    assert!(outcomes.is_empty());
}

#[test]
fn test_step_without_cmd_rejected() {
    let result = JobFile::parse("[[step]]\nlabel = \"x\"\n");
    assert!(matches!(result, Err(JobFileError::Parse(_))));
}

#[cfg(unix)]
#[test]
fn test_run_from_job_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let contents = format!(
        r#"
[[step]]
label = "write"
cmd = "touch {out}/*[name]"
[step.args]
name = ["one", "two", "three"]

[[step]]
label = "count"
cmd = "ls {out}"
"#,
        out = out.display()
    );
    let file = JobFile::parse(&contents).unwrap();

    let mut scheduler = Scheduler::new(3);
    file.schedule(&mut scheduler, &Decorator::default(), &Backend::Local)
        .unwrap();
    scheduler.submit();

    assert!(scheduler.all_succeeded());
    let listing = scheduler.stdout(1).unwrap()[0].unwrap().to_vec();
    assert_eq!(listing, vec!["one", "three", "two"]);
}
