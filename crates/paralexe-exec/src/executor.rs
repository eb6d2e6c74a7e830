//! Runs one command to completion.
//!
//! The executor:
//! - Splits the command into argv and hands it to its backend
//! - Drains stdout/stderr into memory on reader threads
//! - Polls the child so cancellation and the optional timeout can terminate
//!   it (SIGTERM to the process group, SIGKILL after the grace period)
//! - Records the process id so other threads can check liveness

use std::io::{self, Read};
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::argv::split_command;
use crate::backend::{Backend, ProcessId};
use crate::cancel::CancelToken;
use crate::error::{ExecError, ExecResult};
use crate::timeout::{TimeoutConfig, TimeoutEnforcer};

/// How often a running child is polled for exit, cancellation and timeout.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Per-execution controls.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Wall-clock limit; `None` runs unbounded.
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL when terminating.
    pub grace: Duration,
    pub cancel: CancelToken,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self::from_timeout(&TimeoutConfig::default(), CancelToken::new())
    }
}

impl ExecOptions {
    pub fn from_timeout(config: &TimeoutConfig, cancel: CancelToken) -> Self {
        Self {
            timeout: config.overall(),
            grace: config.grace(),
            cancel,
        }
    }
}

/// Shared view of an executor's process id, usable while it runs.
#[derive(Debug, Clone)]
pub struct PidHandle {
    backend: Backend,
    id: Arc<Mutex<Option<ProcessId>>>,
}

impl PidHandle {
    pub fn pid(&self) -> Option<ProcessId> {
        self.id.lock().ok().and_then(|id| *id)
    }

    /// Whether the process is still alive. `false` before it was spawned.
    pub fn get_stat(&self) -> ExecResult<bool> {
        match self.pid() {
            Some(id) => self.backend.is_alive(id),
            None => Ok(false),
        }
    }

    fn set(&self, pid: ProcessId) {
        if let Ok(mut id) = self.id.lock() {
            *id = Some(pid);
        }
    }
}

/// Runs exactly one command.
#[derive(Debug)]
pub struct Executor {
    command: String,
    backend: Backend,
    pid: PidHandle,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<ExitStatus>,
    duration: Option<Duration>,
}

impl Executor {
    pub fn new(command: impl Into<String>, backend: Backend) -> Self {
        Self {
            command: command.into(),
            pid: PidHandle {
                backend: backend.clone(),
                id: Arc::new(Mutex::new(None)),
            },
            backend,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: None,
            duration: None,
        }
    }

    /// Local executor
    pub fn local(command: impl Into<String>) -> Self {
        Self::new(command, Backend::Local)
    }

    /// Execute the command, blocking until it exits.
    ///
    /// Output captured before a cancellation or timeout is kept.
    pub fn execute(&mut self, options: &ExecOptions) -> ExecResult<()> {
        let start_time = Instant::now();
        self.stdout.clear();
        self.stderr.clear();
        self.exit_status = None;

        let argv = split_command(&self.command)?;
        let mut command = self.backend.command(&argv)?;

        // Own process group, so termination reaches grandchildren holding
        // our pipes open.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::debug!(
            command = %self.command,
            backend = self.backend.mode(),
            "Spawning"
        );

        let mut child = command.spawn().map_err(|source| ExecError::SpawnFailed {
            program: self.backend.program(&argv).to_string(),
            source,
        })?;
        self.pid.set(ProcessId::Local(child.id()));

        let stdout_handle = spawn_reader(child.stdout.take());
        let stderr_handle = spawn_reader(child.stderr.take());

        let enforcer = TimeoutEnforcer::new(options.timeout);
        let waited = loop {
            if options.cancel.is_cancelled() {
                tracing::debug!(command = %self.command, "Terminating cancelled command");
                terminate_child(&mut child, options.grace)?;
                break Err(ExecError::Cancelled);
            }
            if let Some(limit) = enforcer.exceeded() {
                tracing::warn!(
                    command = %self.command,
                    limit = ?limit,
                    "Command timed out"
                );
                terminate_child(&mut child, options.grace)?;
                break Err(ExecError::TimedOut { limit });
            }

            match child.try_wait()? {
                Some(status) => break Ok(status),
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = join_reader(stdout_handle)?;
        let stderr = join_reader(stderr_handle)?;
        let (stdout, stderr, remote_id) = self.backend.post_process(stdout, stderr);
        if let Some(id) = remote_id {
            self.pid.set(id);
        }
        self.stdout = stdout;
        self.stderr = stderr;
        self.duration = Some(start_time.elapsed());

        let status = waited?;
        self.exit_status = Some(status);
        self.backend.check_channel(remote_id, &self.stderr)
    }

    /// Whether the process is still alive.
    pub fn get_stat(&self) -> ExecResult<bool> {
        self.pid.get_stat()
    }

    /// Handle for liveness checks from another thread.
    pub fn pid_handle(&self) -> PidHandle {
        self.pid.clone()
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid.pid()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Exit code of the last run; `None` if not run, interrupted, or killed
    /// by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|s| s.code())
    }

    /// Signal that killed the child, if any.
    pub fn term_signal(&self) -> Option<i32> {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            self.exit_status.and_then(|s| s.signal())
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

type ReaderHandle = Option<JoinHandle<io::Result<Vec<u8>>>>;

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> ReaderHandle {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_reader(handle: ReaderHandle) -> ExecResult<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| ExecError::Io(io::Error::other("output reader panicked")))?
            .map_err(ExecError::from),
        None => Ok(Vec::new()),
    }
}

/// Terminate a child process gracefully then forcefully.
fn terminate_child(child: &mut Child, grace: Duration) -> ExecResult<()> {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    let start = Instant::now();
    while start.elapsed() < grace {
        match child.try_wait()? {
            Some(_) => return Ok(()),
            None => thread::sleep(POLL_INTERVAL),
        }
    }

    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();

    Ok(())
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Ok(raw) = i32::try_from(child.id()) {
        let _ = killpg(Pid::from_raw(raw), signal);
    }
}
