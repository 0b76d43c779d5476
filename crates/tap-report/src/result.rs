//! Classification of TAP output lines.

use serde::Serialize;

/// Prefix of a passing TAP test line.
const OK_PREFIX: &str = "ok";

/// Prefix of a failing TAP test line.
const NOT_OK_PREFIX: &str = "not ok";

/// Structured result of one test run.
///
/// Built once by [`parse`] and never mutated afterwards. The counts always
/// agree with the partitioned line lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRunResult {
    success: bool,
    raw_stdout_lines: Vec<String>,
    raw_stderr_lines: Vec<String>,
    ok_lines: Vec<String>,
    not_ok_lines: Vec<String>,
    other_lines: Vec<String>,
    total_count: usize,
    passed_count: usize,
    failed_count: usize,
}

/// Parse the captured output of a test command.
///
/// Lines starting with `ok` are passes, lines starting with `not ok` are
/// failures, everything else is kept in `other_lines` and not counted.
/// Any non-empty stderr line marks the run as failed. Never fails: empty
/// output is a (vacuous) success with zero counts.
pub fn parse(stdout: &str, stderr: &str) -> TestRunResult {
    let raw_stdout_lines: Vec<String> = stdout.lines().map(str::to_string).collect();
    let raw_stderr_lines: Vec<String> = stderr.lines().map(str::to_string).collect();

    let mut ok_lines = Vec::new();
    let mut not_ok_lines = Vec::new();
    let mut other_lines = Vec::new();

    for line in &raw_stdout_lines {
        if line.starts_with(OK_PREFIX) {
            ok_lines.push(line.clone());
        } else if line.starts_with(NOT_OK_PREFIX) {
            not_ok_lines.push(line.clone());
        } else {
            other_lines.push(line.clone());
        }
    }

    let passed_count = ok_lines.len();
    let failed_count = not_ok_lines.len();
    let has_stderr = raw_stderr_lines.iter().any(|l| !l.is_empty());

    TestRunResult {
        success: failed_count == 0 && !has_stderr,
        raw_stdout_lines,
        raw_stderr_lines,
        ok_lines,
        not_ok_lines,
        other_lines,
        total_count: passed_count + failed_count,
        passed_count,
        failed_count,
    }
}

impl TestRunResult {
    /// True when no test failed and nothing was written to stderr.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn raw_stdout_lines(&self) -> &[String] {
        &self.raw_stdout_lines
    }

    pub fn raw_stderr_lines(&self) -> &[String] {
        &self.raw_stderr_lines
    }

    pub fn ok_lines(&self) -> &[String] {
        &self.ok_lines
    }

    pub fn not_ok_lines(&self) -> &[String] {
        &self.not_ok_lines
    }

    /// Lines that are neither passes nor failures (plans, diagnostics, noise).
    pub fn other_lines(&self) -> &[String] {
        &self.other_lines
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn passed_count(&self) -> usize {
        self.passed_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// Whether stderr carried any non-empty line.
    pub fn has_stderr(&self) -> bool {
        self.raw_stderr_lines.iter().any(|l| !l.is_empty())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
