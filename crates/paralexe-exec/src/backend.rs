//! Execution backends.
//!
//! A backend decides how an argv is turned into an OS process and how the
//! id of the running job is discovered:
//! - `Local`: plain subprocess, the child pid.
//! - `Ssh`: `ssh` to a remote host; the remote shell echoes `$$` before
//!   `exec`ing the command, so the first stdout line is the remote pid.
//! - `Slurm`: `srun --verbose`; the batch job id is parsed from `srun:` lines
//!   on stderr.

use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Deserialize;

use crate::argv::join_args;
use crate::error::{ExecError, ExecResult};

/// SSH backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote host
    pub host: String,
    /// SSH user (None: ssh's own default)
    pub user: Option<String>,
    /// SSH port (default 22)
    pub port: u16,
    /// Path to SSH private key
    pub key_path: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_seconds: u32,
    /// Server alive interval for detecting dead connections
    pub server_alive_interval: u32,
    /// Server alive count max
    pub server_alive_count_max: u32,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: None,
            port: 22,
            key_path: None,
            connect_timeout_seconds: 30,
            server_alive_interval: 15,
            server_alive_count_max: 2,
        }
    }
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    fn destination(&self) -> String {
        match self.user {
            Some(ref user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Build SSH command arguments up to and including the destination.
    pub fn build_ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.server_alive_count_max),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];

        if let Some(ref key_path) = self.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        args.push(self.destination());
        args
    }
}

/// Slurm backend configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlurmConfig {
    pub partition: Option<String>,
    pub account: Option<String>,
    /// Passed to `--time` verbatim (e.g. "01:00:00")
    pub time_limit: Option<String>,
    /// Extra `srun` flags, inserted before the command
    pub extra_args: Vec<String>,
}

impl SlurmConfig {
    pub fn build_srun_args(&self) -> Vec<String> {
        let mut args = vec!["--verbose".to_string()];
        if let Some(ref partition) = self.partition {
            args.push(format!("--partition={}", partition));
        }
        if let Some(ref account) = self.account {
            args.push(format!("--account={}", account));
        }
        if let Some(ref time_limit) = self.time_limit {
            args.push(format!("--time={}", time_limit));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Where a command runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Ssh(SshConfig),
    Slurm(SlurmConfig),
}

/// Identifier of a running (or finished) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessId {
    /// Pid on this machine
    Local(u32),
    /// Pid on the ssh host
    Remote(u32),
    /// Batch scheduler job id
    Batch(u64),
}

impl ProcessId {
    /// The numeric id, whatever its namespace.
    pub fn as_u64(&self) -> u64 {
        match *self {
            ProcessId::Local(pid) | ProcessId::Remote(pid) => u64::from(pid),
            ProcessId::Batch(id) => id,
        }
    }
}

fn srun_job_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^srun: .*?\bjob(?:id)?\s+(\d+)").expect("static pattern is valid")
    })
}

impl Backend {
    /// Short name used in logs and config (`local`, `ssh`, `slurm`).
    pub fn mode(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Ssh(_) => "ssh",
            Backend::Slurm(_) => "slurm",
        }
    }

    /// Build the process for `argv` with piped stdout/stderr.
    pub(crate) fn command(&self, argv: &[String]) -> ExecResult<Command> {
        let (program, rest) = argv.split_first().ok_or(ExecError::EmptyCommand)?;

        let mut command = match self {
            Backend::Local => {
                let mut command = Command::new(program);
                command.args(rest);
                command
            }
            Backend::Ssh(config) => {
                if config.host.is_empty() {
                    return Err(ExecError::Remote("ssh backend has no host".to_string()));
                }
                let mut command = Command::new("ssh");
                command
                    .args(config.build_ssh_args())
                    .arg(format!("echo $$; exec {}", join_args(argv)));
                command
            }
            Backend::Slurm(config) => {
                let mut command = Command::new("srun");
                command.args(config.build_srun_args()).args(argv);
                command
            }
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(command)
    }

    /// The program actually spawned for `argv`.
    pub(crate) fn program<'a>(&self, argv: &'a [String]) -> &'a str {
        match self {
            Backend::Local => argv.first().map(String::as_str).unwrap_or(""),
            Backend::Ssh(_) => "ssh",
            Backend::Slurm(_) => "srun",
        }
    }

    /// Strip backend bookkeeping from captured output and extract the
    /// remote job id when the backend reports one.
    pub(crate) fn post_process(
        &self,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    ) -> (Vec<u8>, Vec<u8>, Option<ProcessId>) {
        match self {
            Backend::Local => (stdout, stderr, None),
            Backend::Ssh(_) => {
                let head_len = stdout
                    .iter()
                    .position(|&b| b == b'\n')
                    .unwrap_or(stdout.len());
                let pid: Option<u32> = std::str::from_utf8(&stdout[..head_len])
                    .ok()
                    .and_then(|h| h.trim().parse().ok());
                match pid {
                    Some(pid) => {
                        let body_start = (head_len + 1).min(stdout.len());
                        let body = stdout[body_start..].to_vec();
                        (body, stderr, Some(ProcessId::Remote(pid)))
                    }
                    // The remote shell never got as far as `echo $$`.
                    None => (stdout, stderr, None),
                }
            }
            Backend::Slurm(_) => {
                let text = String::from_utf8_lossy(&stderr);
                let mut job_id = None;
                let mut kept = String::with_capacity(text.len());
                for line in text.split_inclusive('\n') {
                    if line.starts_with("srun: ") {
                        if job_id.is_none() {
                            job_id = srun_job_id_pattern()
                                .captures(line)
                                .and_then(|c| c[1].parse().ok())
                                .map(ProcessId::Batch);
                        }
                    } else {
                        kept.push_str(line);
                    }
                }
                (stdout, kept.into_bytes(), job_id)
            }
        }
    }

    /// Fail a finished run whose backend channel broke before the command
    /// started. For ssh that is a run without the remote pid header; the
    /// client's last stderr line says why.
    pub(crate) fn check_channel(&self, id: Option<ProcessId>, stderr: &[u8]) -> ExecResult<()> {
        match self {
            Backend::Ssh(config) if id.is_none() => {
                let text = String::from_utf8_lossy(stderr);
                let reason = text
                    .lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or("no output from ssh");
                Err(ExecError::Remote(format!(
                    "ssh to {} failed before the command started: {}",
                    config.host, reason
                )))
            }
            _ => Ok(()),
        }
    }

    /// Check whether `id` is still running.
    pub fn is_alive(&self, id: ProcessId) -> ExecResult<bool> {
        match (self, id) {
            (_, ProcessId::Local(pid)) => Ok(local_pid_alive(pid)),
            (Backend::Ssh(config), ProcessId::Remote(pid)) => {
                let status = Command::new("ssh")
                    .args(config.build_ssh_args())
                    .arg(format!("kill -0 {}", pid))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map_err(|e| ExecError::Remote(format!("Failed to spawn SSH: {}", e)))?;
                Ok(status.success())
            }
            (Backend::Slurm(_), ProcessId::Batch(job_id)) => {
                let output = Command::new("squeue")
                    .args(["-h", "-j", &job_id.to_string()])
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|e| ExecError::Remote(format!("Failed to spawn squeue: {}", e)))?;
                Ok(output.status.success() && !output.stdout.iter().all(u8::is_ascii_whitespace))
            }
            (backend, id) => Err(ExecError::Remote(format!(
                "{} backend cannot query {:?}",
                backend.mode(),
                id
            ))),
        }
    }
}

#[cfg(unix)]
fn local_pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM means the process exists but belongs to someone else.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn local_pid_alive(_pid: u32) -> bool {
    false
}
