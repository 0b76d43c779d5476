//! Test session supervision
//!
//! A session is one launch of the test command, from spawn to a resolved
//! result. The supervisor allows at most one session at a time and exposes a
//! non-blocking poll protocol to the foreground:
//!
//! Idle → Running → Completed → Idle
//!
//! `start_session` moves Idle → Running, `poll` moves Running → Completed
//! (exit, spawn failure, or forced termination on timeout), and `consume`
//! hands the result over and moves back to Idle. Waiting on the child happens
//! on one worker thread per session; its outcome is handed back through a
//! channel and errors never cross that boundary as panics.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use tap_report::TestRunResult;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::runner::{ProcessControl, ProcessRunner, RunOutput, RunRequest, RunnerError};
use crate::timeout::{TimeoutConfig, TimeoutEnforcer};

/// Errors for session state operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

/// What a single `poll()` observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No session has been started (or the last one was consumed)
    Idle,
    /// The child is still running
    StillRunning { elapsed: Duration },
    /// The child exited and its output was parsed
    Finished(TestRunResult),
    /// The time limit was hit and the child was killed
    TimedOutAndTerminated { elapsed: Duration },
    /// No result could be produced (spawn failure, worker error)
    Aborted { reason: String },
}

impl PollOutcome {
    /// True for outcomes that must be followed by `consume()`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollOutcome::Finished(_)
                | PollOutcome::TimedOutAndTerminated { .. }
                | PollOutcome::Aborted { .. }
        )
    }
}

/// How a completed session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Finished {
        result: TestRunResult,
        exit_code: Option<i32>,
    },
    TimedOut {
        elapsed: Duration,
    },
    Aborted {
        reason: String,
    },
}

impl Resolution {
    fn into_result(self) -> Option<TestRunResult> {
        match self {
            Resolution::Finished { result, .. } => Some(result),
            _ => None,
        }
    }

    fn to_outcome(&self) -> PollOutcome {
        match self {
            Resolution::Finished { result, .. } => PollOutcome::Finished(result.clone()),
            Resolution::TimedOut { elapsed } => PollOutcome::TimedOutAndTerminated { elapsed: *elapsed },
            Resolution::Aborted { reason } => PollOutcome::Aborted {
                reason: reason.clone(),
            },
        }
    }
}

/// Worker thread verdict, sent once per session.
type WorkerOutcome = Result<RunOutput, String>;

/// Supervisor state
#[derive(Debug)]
pub enum SessionState {
    Idle,
    Running {
        request: RunRequest,
        timeout: TimeoutEnforcer,
        control: ProcessControl,
        outcome: Receiver<WorkerOutcome>,
    },
    Completed(Resolution),
}

impl SessionState {
    /// Short state name for errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running { .. } => "running",
            SessionState::Completed(_) => "completed",
        }
    }
}

/// Owns the single in-flight test session.
#[derive(Debug)]
pub struct TestSessionSupervisor {
    runner: ProcessRunner,
    timeout: Duration,
    state: SessionState,
    /// Forced terminations issued, across all sessions
    terminations: usize,
    /// Worker threads started, across all sessions
    workers_spawned: usize,
}

impl TestSessionSupervisor {
    pub fn new(config: TimeoutConfig) -> Self {
        Self::with_limits(config.overall(), config.termination_grace())
    }

    pub fn with_limits(timeout: Duration, termination_grace: Duration) -> Self {
        Self {
            runner: ProcessRunner::new(termination_grace),
            timeout,
            state: SessionState::Idle,
            terminations: 0,
            workers_spawned: 0,
        }
    }

    /// Start a session unless one is already in flight.
    ///
    /// Returns `false` without side effects while a session is Running or
    /// waiting to be consumed. A spawn failure still starts (and immediately
    /// resolves) a session, so this returns `true` and the next poll reports
    /// `Aborted`.
    pub fn start_session(&mut self, request: RunRequest) -> bool {
        if !matches!(self.state, SessionState::Idle) {
            debug!(state = self.state.name(), "session already in flight, ignoring start");
            return false;
        }

        let timeout = TimeoutEnforcer::new(self.timeout);

        let handle = match self.runner.start(&request) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "could not start test command");
                self.state = SessionState::Completed(Resolution::Aborted {
                    reason: e.to_string(),
                });
                return true;
            }
        };

        info!(
            pid = handle.pid(),
            cwd = %request.working_directory.display(),
            "test session started"
        );

        let control = handle.control();
        let (tx, rx) = mpsc::channel();
        let runner = self.runner;
        thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.wait(handle)))
                .unwrap_or_else(|_| Err(RunnerError::ReaderPanicked("worker")))
                .map_err(|e| e.to_string());
            // The receiver is gone if the session timed out first.
            let _ = tx.send(outcome);
        });
        self.workers_spawned += 1;

        self.state = SessionState::Running {
            request,
            timeout,
            control,
            outcome: rx,
        };
        true
    }

    /// Observe the session without blocking.
    ///
    /// Moves Running → Completed when the child has exited, or when the time
    /// limit is reached, in which case the child is terminated from within
    /// this call. Completed states keep reporting the same outcome until
    /// consumed.
    pub fn poll(&mut self) -> PollOutcome {
        let resolution = match &self.state {
            SessionState::Idle => return PollOutcome::Idle,
            SessionState::Completed(resolution) => return resolution.to_outcome(),
            SessionState::Running {
                timeout,
                control,
                outcome,
                ..
            } => match outcome.try_recv() {
                Ok(Ok(output)) => {
                    let result = tap_report::parse(&output.stdout, &output.stderr);
                    info!(
                        exit_code = ?output.exit_code,
                        passed = result.passed_count(),
                        failed = result.failed_count(),
                        success = result.success(),
                        "test session finished"
                    );
                    Resolution::Finished {
                        result,
                        exit_code: output.exit_code,
                    }
                }
                Ok(Err(reason)) => {
                    warn!(%reason, "test session aborted");
                    Resolution::Aborted { reason }
                }
                Err(TryRecvError::Disconnected) => {
                    warn!("test worker exited without reporting");
                    Resolution::Aborted {
                        reason: "test worker exited without reporting".to_string(),
                    }
                }
                Err(TryRecvError::Empty) => {
                    let elapsed = timeout.elapsed();
                    if !timeout.check().is_timeout() {
                        return PollOutcome::StillRunning { elapsed };
                    }

                    warn!(
                        pid = control.pid(),
                        elapsed_secs = elapsed.as_secs(),
                        "test session timed out, terminating"
                    );
                    self.terminations += 1;
                    if let Err(e) = self.runner.terminate(control) {
                        warn!(error = %e, "failed to terminate test command");
                    }
                    Resolution::TimedOut { elapsed }
                }
            },
        };

        let outcome = resolution.to_outcome();
        self.state = SessionState::Completed(resolution);
        outcome
    }

    /// Take the result of a completed session and return to Idle.
    ///
    /// `None` means the session timed out or was aborted.
    pub fn consume(&mut self) -> Result<Option<TestRunResult>, SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Completed(resolution) => Ok(resolution.into_result()),
            other => {
                let state = other.name();
                self.state = other;
                Err(SessionError::InvalidState {
                    operation: "consume",
                    state,
                })
            }
        }
    }

    /// Stop an in-flight child before the host goes away.
    pub fn shutdown(&mut self) {
        if let SessionState::Running { control, .. } = &self.state {
            info!(pid = control.pid(), "stopping test command on shutdown");
            if let Err(e) = self.runner.terminate(control) {
                warn!(error = %e, "failed to terminate test command");
            }
            self.state = SessionState::Idle;
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle)
    }

    /// When the current session started, if one is running.
    pub fn started_at(&self) -> Option<Instant> {
        match &self.state {
            SessionState::Running { timeout, .. } => Some(timeout.start_time()),
            _ => None,
        }
    }

    /// The request behind the running session.
    pub fn current_request(&self) -> Option<&RunRequest> {
        match &self.state {
            SessionState::Running { request, .. } => Some(request),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn terminations(&self) -> usize {
        self.terminations
    }

    pub fn workers_spawned(&self) -> usize {
        self.workers_spawned
    }
}
