//! Session lifecycle tests against real child processes
//!
//! Covers start/poll/consume, the single-session rule, timeout termination
//! and spawn failures.

#![cfg(unix)]

use std::time::{Duration, Instant};

use tap_on_save::{PollOutcome, RunRequest, SessionError, TestSessionSupervisor};
use tempfile::TempDir;

fn supervisor(timeout: Duration) -> TestSessionSupervisor {
    TestSessionSupervisor::with_limits(timeout, Duration::from_millis(300))
}

/// Poll on a 20ms cadence until a terminal outcome or `limit` passes.
fn poll_until_terminal(supervisor: &mut TestSessionSupervisor, limit: Duration) -> PollOutcome {
    let deadline = Instant::now() + limit;
    loop {
        let outcome = supervisor.poll();
        if outcome.is_terminal() {
            return outcome;
        }
        assert!(Instant::now() < deadline, "session did not resolve in {:?}", limit);
        std::thread::sleep(Duration::from_millis(20));
    }
}

// === Completion ===

#[test]
fn test_finished_run_is_parsed() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    let request = RunRequest::new(dir.path(), "printf 'ok 1 foo\\nnot ok 2 bar\\nok 3 baz\\n'");

    assert!(supervisor.start_session(request));
    assert!(supervisor.is_running());

    let outcome = poll_until_terminal(&mut supervisor, Duration::from_secs(5));
    let PollOutcome::Finished(result) = outcome else {
        panic!("expected Finished, got {:?}", outcome);
    };
    assert_eq!(result.total_count(), 3);
    assert_eq!(result.passed_count(), 2);
    assert_eq!(result.failed_count(), 1);
    assert!(!result.success());

    let consumed = supervisor.consume().unwrap().expect("finished run has a result");
    assert_eq!(consumed, result);
    assert!(supervisor.is_idle());
    assert_eq!(supervisor.poll(), PollOutcome::Idle);
}

#[test]
fn test_terminal_outcome_repeats_until_consumed() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "echo 'ok 1 a'"));

    let first = poll_until_terminal(&mut supervisor, Duration::from_secs(5));
    assert_eq!(supervisor.poll(), first);
    assert_eq!(supervisor.poll(), first);
    assert!(supervisor.consume().unwrap().is_some());
}

#[test]
fn test_stderr_output_fails_run() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "echo 'ok 1 a'; echo 'Deprecation' >&2"));

    let result = match poll_until_terminal(&mut supervisor, Duration::from_secs(5)) {
        PollOutcome::Finished(result) => result,
        other => panic!("expected Finished, got {:?}", other),
    };
    assert_eq!(result.failed_count(), 0);
    assert!(!result.success());
    assert_eq!(result.raw_stderr_lines(), ["Deprecation".to_string()]);
}

#[test]
fn test_exit_code_does_not_decide_success() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "echo 'ok 1 a'; exit 7"));

    match poll_until_terminal(&mut supervisor, Duration::from_secs(5)) {
        PollOutcome::Finished(result) => assert!(result.success()),
        other => panic!("expected Finished, got {:?}", other),
    }
}

#[test]
fn test_empty_output_is_vacuous_success() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "true"));

    match poll_until_terminal(&mut supervisor, Duration::from_secs(5)) {
        PollOutcome::Finished(result) => {
            assert!(result.success());
            assert_eq!(result.total_count(), 0);
        }
        other => panic!("expected Finished, got {:?}", other),
    }
}

// === Single session rule ===

#[test]
fn test_second_start_is_noop_while_running() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));

    assert!(supervisor.start_session(RunRequest::new(dir.path(), "sleep 0.5; echo 'ok 1 first'")));
    assert!(!supervisor.start_session(RunRequest::new(dir.path(), "echo 'ok 1 second'")));
    assert_eq!(supervisor.workers_spawned(), 1);

    match poll_until_terminal(&mut supervisor, Duration::from_secs(5)) {
        PollOutcome::Finished(result) => {
            assert_eq!(result.ok_lines(), ["ok 1 first".to_string()]);
        }
        other => panic!("expected Finished, got {:?}", other),
    }
    supervisor.consume().unwrap();

    assert!(supervisor.start_session(RunRequest::new(dir.path(), "true")));
    assert_eq!(supervisor.workers_spawned(), 2);
}

#[test]
fn test_consume_while_running_is_invalid() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "sleep 1"));

    assert_eq!(
        supervisor.consume(),
        Err(SessionError::InvalidState {
            operation: "consume",
            state: "running",
        })
    );
    // The failed consume must not disturb the running session.
    assert!(supervisor.is_running());
    supervisor.shutdown();
}

#[test]
fn test_poll_does_not_block() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "sleep 2"));

    let started = Instant::now();
    for _ in 0..5 {
        assert!(matches!(supervisor.poll(), PollOutcome::StillRunning { .. }));
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(supervisor.started_at().is_some());
    supervisor.shutdown();
    assert!(supervisor.is_idle());
}

// === Timeout ===

#[test]
fn test_timeout_terminates_once() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_millis(300));
    supervisor.start_session(RunRequest::new(dir.path(), "sleep 30"));

    let started = Instant::now();
    let outcome = poll_until_terminal(&mut supervisor, Duration::from_secs(5));
    assert!(matches!(outcome, PollOutcome::TimedOutAndTerminated { elapsed } if elapsed >= Duration::from_millis(300)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.terminations(), 1);

    // Re-polling reports the same outcome without terminating again.
    assert!(matches!(supervisor.poll(), PollOutcome::TimedOutAndTerminated { .. }));
    assert_eq!(supervisor.terminations(), 1);

    assert_eq!(supervisor.consume(), Ok(None));
    assert!(supervisor.is_idle());
}

#[test]
fn test_timeout_kills_stubborn_process() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_millis(200));
    supervisor.start_session(RunRequest::new(
        dir.path(),
        "trap '' TERM; while true; do sleep 0.05; done",
    ));

    let outcome = poll_until_terminal(&mut supervisor, Duration::from_secs(5));
    assert!(matches!(outcome, PollOutcome::TimedOutAndTerminated { .. }));
    assert_eq!(supervisor.consume(), Ok(None));
}

#[test]
fn test_timeout_kills_background_jobs_left_by_shell() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_millis(300));
    // The shell exits at once; the background job keeps stdout open.
    supervisor.start_session(RunRequest::new(
        dir.path(),
        "echo 'ok 1 a'; (sleep 1; touch late; sleep 20) &",
    ));

    let outcome = poll_until_terminal(&mut supervisor, Duration::from_secs(5));
    assert!(matches!(outcome, PollOutcome::TimedOutAndTerminated { .. }));
    assert_eq!(supervisor.terminations(), 1);

    std::thread::sleep(Duration::from_millis(1500));
    assert!(!dir.path().join("late").exists(), "background job outlived the timeout");
    assert_eq!(supervisor.consume(), Ok(None));
}

// === Spawn failure ===

#[test]
fn test_spawn_failure_then_recover() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));

    let missing = dir.path().join("does-not-exist");
    assert!(supervisor.start_session(RunRequest::new(&missing, "echo 'ok 1'")));
    assert!(matches!(supervisor.poll(), PollOutcome::Aborted { .. }));
    assert_eq!(supervisor.consume(), Ok(None));

    assert!(supervisor.start_session(RunRequest::new(dir.path(), "echo 'ok 1 back'")));
    match poll_until_terminal(&mut supervisor, Duration::from_secs(5)) {
        PollOutcome::Finished(result) => assert!(result.success()),
        other => panic!("expected Finished, got {:?}", other),
    }
}

#[test]
fn test_caller_cwd_unchanged() {
    let dir = TempDir::new().unwrap();
    let before = std::env::current_dir().unwrap();
    let mut supervisor = supervisor(Duration::from_secs(10));
    supervisor.start_session(RunRequest::new(dir.path(), "pwd"));

    poll_until_terminal(&mut supervisor, Duration::from_secs(5));
    assert_eq!(std::env::current_dir().unwrap(), before);
}
