//! Save-event handling
//!
//! [`SaveHandler`] is the foreground owner of the supervisor. A save event
//! goes through `on_file_saved`, and the host calls `tick` on a fixed
//! interval until the session resolves and the report reaches the sink.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveTime};
use tap_report::{format_aborted, format_details, format_status, format_timeout, TestRunResult};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::discovery::{anchor_for, find_test_folder};
use crate::runner::RunRequest;
use crate::session::{PollOutcome, TestSessionSupervisor};
use crate::sink::OutputSink;

/// Status text while a run is in flight.
pub const RUNNING_STATUS: &str = "Testing ...";

/// What a save event led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A session was started in this directory
    Started(PathBuf),
    /// A session is already in flight; the event was dropped
    AlreadyRunning,
    /// No ancestor has a test folder
    NoTestFolder,
}

/// Final verdict of one session, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Finished(TestRunResult),
    TimedOut { elapsed: Duration },
    Aborted { reason: String },
}

impl Report {
    pub fn succeeded(&self) -> bool {
        matches!(self, Report::Finished(result) if result.success())
    }

    /// Status line and panel text for this report.
    pub fn render(&self, now: NaiveTime) -> (String, String) {
        match self {
            Report::Finished(result) => {
                let status = format_status(result, now);
                let panel = format!("{}{}", status, format_details(result));
                (status, panel)
            }
            Report::TimedOut { elapsed } => {
                let status = format_timeout(*elapsed, now);
                (status.clone(), status)
            }
            Report::Aborted { reason } => {
                let status = format_aborted(reason, now);
                (status.clone(), status)
            }
        }
    }
}

/// Connects save events, the supervisor and the output sink.
pub struct SaveHandler<S: OutputSink> {
    settings: Settings,
    supervisor: TestSessionSupervisor,
    sink: S,
}

impl<S: OutputSink> SaveHandler<S> {
    pub fn new(settings: Settings, sink: S) -> Self {
        let supervisor = TestSessionSupervisor::new(settings.timeout());
        Self::with_supervisor(settings, supervisor, sink)
    }

    pub fn with_supervisor(settings: Settings, supervisor: TestSessionSupervisor, sink: S) -> Self {
        Self {
            settings,
            supervisor,
            sink,
        }
    }

    /// Handle a save of `path`.
    pub fn on_file_saved(&mut self, path: &Path) -> TriggerOutcome {
        let anchor = anchor_for(path);
        let anchor = anchor.canonicalize().unwrap_or_else(|_| anchor.to_path_buf());

        let Some(folder) = find_test_folder(&anchor, &self.settings.test_dir_name) else {
            info!(
                file = %path.display(),
                test_dir = %self.settings.test_dir_name,
                "no tests found, not running"
            );
            return TriggerOutcome::NoTestFolder;
        };

        let request = RunRequest::new(folder.clone(), self.settings.command.clone());
        if !self.supervisor.start_session(request) {
            match self.supervisor.current_request() {
                Some(running) => debug!(
                    file = %path.display(),
                    running_in = %running.working_directory.display(),
                    "test run already in flight, dropping save"
                ),
                None => debug!(file = %path.display(), "previous run not yet reported, dropping save"),
            }
            return TriggerOutcome::AlreadyRunning;
        }

        info!(file = %path.display(), folder = %folder.display(), "running tests");
        self.sink.set_status(&self.settings.status_key, RUNNING_STATUS);
        TriggerOutcome::Started(folder)
    }

    /// Poll the supervisor once. Returns the report when a session resolves.
    pub fn tick(&mut self) -> Option<Report> {
        let report = match self.supervisor.poll() {
            PollOutcome::Idle => return None,
            PollOutcome::StillRunning { .. } => {
                self.sink.set_status(&self.settings.status_key, RUNNING_STATUS);
                return None;
            }
            PollOutcome::Finished(result) => Report::Finished(result),
            PollOutcome::TimedOutAndTerminated { elapsed } => Report::TimedOut { elapsed },
            PollOutcome::Aborted { reason } => Report::Aborted { reason },
        };

        if let Err(e) = self.supervisor.consume() {
            warn!(error = %e, "could not consume finished session");
        }

        self.present(&report, Local::now().time());
        Some(report)
    }

    /// Write a report to the sink: status, panel content, panel visibility.
    pub fn present(&mut self, report: &Report, now: NaiveTime) {
        let (status, panel) = report.render(now);
        let panel_name = self.settings.panel_name.as_str();

        self.sink.write_panel(panel_name, &panel);
        self.sink.set_status(&self.settings.status_key, &status);
        if report.succeeded() {
            self.sink.hide_panel(panel_name);
        } else {
            self.sink.show_panel(panel_name);
        }
    }

    /// True while a session is running or waiting to be reported.
    pub fn is_busy(&self) -> bool {
        !self.supervisor.is_idle()
    }

    /// Tick every poll interval until the current session resolves.
    pub fn run_to_completion(&mut self) -> Option<Report> {
        let interval = self.settings.poll_interval();
        while self.is_busy() {
            if let Some(report) = self.tick() {
                return Some(report);
            }
            std::thread::sleep(interval);
        }
        None
    }

    /// Stop any in-flight run.
    pub fn shutdown(&mut self) {
        self.supervisor.shutdown();
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn supervisor(&self) -> &TestSessionSupervisor {
        &self.supervisor
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
