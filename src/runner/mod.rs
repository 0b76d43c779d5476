//! External test process execution.
//!
//! This module handles:
//! - Launching the test command through the platform shell, scoped to the
//!   requested working directory (the caller's own cwd is never touched)
//! - Buffering stdout and stderr separately on reader threads
//! - Non-blocking liveness checks
//! - Forced termination via SIGTERM, then SIGKILL after a grace period

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// How often a waiting thread re-checks the child for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors raised while launching the test command.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("working directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised while waiting on or stopping a running command.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} reader thread panicked")]
    ReaderPanicked(&'static str),
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Directory the child starts in
    pub working_directory: PathBuf,
    /// Shell command line
    pub command: String,
}

impl RunRequest {
    pub fn new(working_directory: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            working_directory: working_directory.into(),
            command: command.into(),
        }
    }
}

/// Everything captured from a finished child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Shared access to a running child for liveness checks and termination.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl ProcessControl {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// A launched child plus the threads draining its output.
///
/// Consumed by [`ProcessRunner::wait`].
#[derive(Debug)]
pub struct ProcessHandle {
    control: ProcessControl,
    stdout: JoinHandle<io::Result<String>>,
    stderr: JoinHandle<io::Result<String>>,
}

impl ProcessHandle {
    /// A cloneable control for the same child.
    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }

    pub fn pid(&self) -> u32 {
        self.control.pid
    }
}

/// Launches, waits on and stops test commands.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    /// Time between SIGTERM and SIGKILL
    termination_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ProcessRunner {
    pub fn new(termination_grace: Duration) -> Self {
        Self { termination_grace }
    }

    /// Launch `request.command` in `request.working_directory`.
    pub fn start(&self, request: &RunRequest) -> Result<ProcessHandle, SpawnError> {
        if !request.working_directory.is_dir() {
            return Err(SpawnError::MissingDirectory(request.working_directory.clone()));
        }

        let mut command = shell_command(&request.command);
        command
            .current_dir(&request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so termination reaches everything the shell starts.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Launch {
            command: request.command.clone(),
            source,
        })?;

        let pid = child.id();
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        debug!(
            pid,
            command = %request.command,
            cwd = %request.working_directory.display(),
            "spawned test command"
        );

        Ok(ProcessHandle {
            control: ProcessControl {
                child: Arc::new(Mutex::new(child)),
                pid,
            },
            stdout,
            stderr,
        })
    }

    /// Block until the child exits and return its buffered output.
    pub fn wait(&self, handle: ProcessHandle) -> RunnerResult<RunOutput> {
        // try_wait in a loop so the lock is free for is_alive/terminate.
        let status = loop {
            if let Some(status) = lock(&handle.control.child).try_wait()? {
                break status;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };

        let stdout = handle
            .stdout
            .join()
            .map_err(|_| RunnerError::ReaderPanicked("stdout"))??;
        let stderr = handle
            .stderr
            .join()
            .map_err(|_| RunnerError::ReaderPanicked("stderr"))??;

        Ok(RunOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&self, control: &ProcessControl) -> bool {
        match lock(&control.child).try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(pid = control.pid, error = %e, "could not query child status");
                false
            }
        }
    }

    /// Stop the child and everything in its process group: SIGTERM, wait out
    /// the grace period while the leader lives, then SIGKILL.
    ///
    /// The group is signalled even when the leader has already exited, since
    /// background jobs it left behind may still hold the output pipes.
    /// Returns only once the leader has been reaped.
    pub fn terminate(&self, control: &ProcessControl) -> RunnerResult<()> {
        debug!(pid = control.pid, "sending SIGTERM to test command group");
        signal_terminate(control);

        let start = Instant::now();
        let mut leader_exited = false;
        while start.elapsed() < self.termination_grace {
            if lock(&control.child).try_wait()?.is_some() {
                leader_exited = true;
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        if !leader_exited {
            warn!(pid = control.pid, "test command ignored SIGTERM, killing");
        }
        // Stragglers in the group get no grace once the leader is gone.
        signal_kill(control);

        let mut child = lock(&control.child);
        // Already-reaped children report InvalidInput here.
        let _ = child.kill();
        child.wait()?;
        Ok(())
    }
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(not(unix))]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

/// ESRCH means the group is already empty.
#[cfg(unix)]
fn signal_group(control: &ProcessControl, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(control.pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid = control.pid, signal = ?signal, error = %e, "could not signal test command group"),
    }
}

#[cfg(unix)]
fn signal_terminate(control: &ProcessControl) {
    signal_group(control, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn signal_terminate(control: &ProcessControl) {
    let _ = lock(&control.child).kill();
}

#[cfg(unix)]
fn signal_kill(control: &ProcessControl) {
    signal_group(control, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn signal_kill(_control: &ProcessControl) {}

/// Read a pipe to the end on its own thread.
fn drain<R>(pipe: Option<R>) -> JoinHandle<io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

/// A poisoned lock still guards a valid `Child`.
fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_millis(500))
    }

    #[test]
    fn test_start_missing_directory() {
        let request = RunRequest::new("/definitely/not/here", "true");
        let err = runner().start(&request).unwrap_err();
        assert!(matches!(err, SpawnError::MissingDirectory(_)));
    }

    #[test]
    fn test_wait_captures_streams_separately() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new(dir.path(), "echo 'ok 1 out'; echo oops >&2; exit 3");
        let runner = runner();
        let handle = runner.start(&request).unwrap();
        let output = runner.wait(handle).unwrap();

        assert_eq!(output.stdout, "ok 1 out\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn test_child_runs_in_requested_directory() {
        let dir = TempDir::new().unwrap();
        let before = std::env::current_dir().unwrap();
        let request = RunRequest::new(dir.path(), "pwd");
        let runner = runner();
        let output = runner.wait(runner.start(&request).unwrap()).unwrap();

        let reported = PathBuf::from(output.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_is_alive_and_terminate() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new(dir.path(), "sleep 30");
        let runner = runner();
        let handle = runner.start(&request).unwrap();
        let control = handle.control();

        assert!(runner.is_alive(&control));

        let started = Instant::now();
        runner.terminate(&control).unwrap();
        assert!(!runner.is_alive(&control));
        assert!(started.elapsed() < Duration::from_secs(5));

        let output = runner.wait(handle).unwrap();
        assert_eq!(output.exit_code, None);
    }

    #[test]
    fn test_terminate_escalates_to_kill() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new(dir.path(), "trap '' TERM; while true; do sleep 0.05; done");
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let handle = runner.start(&request).unwrap();
        let control = handle.control();

        // Give the shell time to install the trap.
        thread::sleep(Duration::from_millis(100));
        runner.terminate(&control).unwrap();
        assert!(!runner.is_alive(&control));
    }

    #[test]
    fn test_terminate_after_exit_succeeds() {
        let dir = TempDir::new().unwrap();
        let runner = runner();
        let handle = runner.start(&RunRequest::new(dir.path(), "true")).unwrap();
        let control = handle.control();
        runner.wait(handle).unwrap();

        assert!(!runner.is_alive(&control));
        runner.terminate(&control).unwrap();
    }

    #[test]
    fn test_terminate_reaches_group_after_leader_exits() {
        let dir = TempDir::new().unwrap();
        let runner = runner();
        let handle = runner
            .start(&RunRequest::new(dir.path(), "(sleep 1; touch late) &"))
            .unwrap();
        let control = handle.control();

        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.is_alive(&control) {
            assert!(Instant::now() < deadline, "shell did not exit");
            thread::sleep(Duration::from_millis(10));
        }

        runner.terminate(&control).unwrap();
        // The background job held stdout; killing it lets the readers finish.
        runner.wait(handle).unwrap();

        thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("late").exists());
    }
}
