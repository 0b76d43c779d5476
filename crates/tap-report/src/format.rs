//! Presentation strings for a finished (or abandoned) test run.
//!
//! Every formatter is pure: the clock reading is passed in by the caller.

use std::time::Duration;

use chrono::NaiveTime;

use crate::TestRunResult;

/// 24-hour, zero-padded wall clock.
const CLOCK_FORMAT: &str = "%H:%M:%S";

/// One-line summary, e.g. `FAILED - OK #2 FAIL #1 TOTAL 3 - 09:41:07\n`.
pub fn format_status(result: &TestRunResult, now: NaiveTime) -> String {
    let verdict = if result.success() { "SUCCESS" } else { "FAILED" };
    format!(
        "{} - OK #{} FAIL #{} TOTAL {} - {}\n",
        verdict,
        result.passed_count(),
        result.failed_count(),
        result.total_count(),
        now.format(CLOCK_FORMAT)
    )
}

/// Failure details: every `not ok` line, then the stderr block if any.
pub fn format_details(result: &TestRunResult) -> String {
    let mut out = String::new();
    for line in result.not_ok_lines() {
        out.push_str(line);
        out.push('\n');
    }

    if !result.success() && result.has_stderr() {
        out.push_str("ERROR:\n");
        for line in result.raw_stderr_lines() {
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}

/// Status line for a run that was killed after exceeding its time limit.
pub fn format_timeout(elapsed: Duration, now: NaiveTime) -> String {
    format!(
        "TIMEOUT - still running after {}s, forcibly stopped - {}\n",
        elapsed.as_secs(),
        now.format(CLOCK_FORMAT)
    )
}

/// Status line for a run that never produced a result (e.g. spawn failure).
pub fn format_aborted(reason: &str, now: NaiveTime) -> String {
    format!("FAILED - {} - {}\n", reason, now.format(CLOCK_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    /// Checks `(SUCCESS|FAILED) - OK #\d+ FAIL #\d+ TOTAL \d+ - \d{2}:\d{2}:\d{2}\n`.
    fn matches_status_shape(line: &str) -> bool {
        let Some(body) = line.strip_suffix('\n') else {
            return false;
        };
        let Some(rest) = body
            .strip_prefix("SUCCESS - OK #")
            .or_else(|| body.strip_prefix("FAILED - OK #"))
        else {
            return false;
        };
        let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

        let Some((passed, rest)) = rest.split_once(" FAIL #") else {
            return false;
        };
        let Some((failed, rest)) = rest.split_once(" TOTAL ") else {
            return false;
        };
        let Some((total, clock)) = rest.split_once(" - ") else {
            return false;
        };
        let parts: Vec<&str> = clock.split(':').collect();

        digits(passed)
            && digits(failed)
            && digits(total)
            && parts.len() == 3
            && parts.iter().all(|p| p.len() == 2 && digits(p))
    }

    #[test]
    fn test_status_success() {
        let result = parse("ok 1 a\nok 2 b\n", "");
        assert_eq!(
            format_status(&result, at(9, 5, 3)),
            "SUCCESS - OK #2 FAIL #0 TOTAL 2 - 09:05:03\n"
        );
    }

    #[test]
    fn test_status_failed() {
        let result = parse("ok 1 foo\nnot ok 2 bar\nok 3 baz\n", "");
        assert_eq!(
            format_status(&result, at(23, 59, 59)),
            "FAILED - OK #2 FAIL #1 TOTAL 3 - 23:59:59\n"
        );
    }

    #[test]
    fn test_status_shape() {
        let cases = [
            ("", ""),
            ("ok 1\n", ""),
            ("not ok 1\n", ""),
            ("ok 1\n", "warning\n"),
            ("noise\n", ""),
        ];
        for (stdout, stderr) in cases {
            let line = format_status(&parse(stdout, stderr), at(0, 0, 0));
            assert!(matches_status_shape(&line), "bad status line: {:?}", line);
        }
        assert!(!matches_status_shape("SUCCESS - OK #1 FAIL #0 TOTAL 1 - 9:00:00\n"));
    }

    #[test]
    fn test_details_only_not_ok_lines() {
        let result = parse("ok 1 foo\nnot ok 2 bar\nok 3 baz\n", "");
        assert_eq!(format_details(&result), "not ok 2 bar\n");
    }

    #[test]
    fn test_details_with_stderr() {
        let result = parse("not ok 1 a\n", "line one\nline two\n");
        assert_eq!(
            format_details(&result),
            "not ok 1 a\nERROR:\nline one\nline two\n"
        );
    }

    #[test]
    fn test_details_empty_on_success() {
        let result = parse("ok 1 a\n# done\n", "");
        assert_eq!(format_details(&result), "");
    }

    #[test]
    fn test_timeout_line() {
        assert_eq!(
            format_timeout(Duration::from_millis(10_250), at(14, 0, 1)),
            "TIMEOUT - still running after 10s, forcibly stopped - 14:00:01\n"
        );
    }

    #[test]
    fn test_aborted_line() {
        assert_eq!(
            format_aborted("could not start test command", at(7, 8, 9)),
            "FAILED - could not start test command - 07:08:09\n"
        );
    }
}
