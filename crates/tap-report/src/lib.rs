//! TAP output classification and report formatting.
//!
//! Turns the raw stdout/stderr of a TAP-producing test command into a
//! [`TestRunResult`] and renders that result as a one-line status plus a
//! details block for display.

mod format;
mod result;

pub use format::{format_aborted, format_details, format_status, format_timeout};
pub use result::{parse, TestRunResult};
