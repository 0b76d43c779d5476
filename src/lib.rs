//! tap-on-save - run a TAP test command whenever a source file is saved
//!
//! On save, the nearest ancestor directory holding a `test` folder is found,
//! the configured test command runs there under a wall-clock timeout, and
//! its TAP output is summarized for an output sink. At most one run is in
//! flight at a time; the caller drives it with a non-blocking poll.

pub mod config;
pub mod discovery;
pub mod runner;
pub mod session;
pub mod signal;
pub mod sink;
pub mod timeout;
pub mod trigger;
pub mod watch;

pub use config::{ConfigError, Settings};
pub use discovery::find_test_folder;
pub use runner::{ProcessRunner, RunOutput, RunRequest, RunnerError, SpawnError};
pub use session::{PollOutcome, SessionError, SessionState, TestSessionSupervisor};
pub use sink::{OutputSink, TerminalSink};
pub use tap_report::{format_details, format_status, parse, TestRunResult};
pub use trigger::{Report, SaveHandler, TriggerOutcome};
