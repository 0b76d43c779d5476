//! Wall-clock timeout enforcement for test sessions
//!
//! The enforcer only reports whether the limit has been reached. Killing the
//! child is the supervisor's job, done from inside `poll()`.

use std::time::{Duration, Instant};

/// Upper bound accepted for `overall_seconds`.
pub const MAX_OVERALL_SECONDS: u64 = 3600;

/// Upper bound accepted for `termination_grace_ms`.
pub const MAX_GRACE_MS: u64 = 60_000;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time per session (default: 10)
    pub overall_seconds: u64,

    /// Time between SIGTERM and SIGKILL when stopping a child (default: 2000)
    pub termination_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            overall_seconds: 10,
            termination_grace_ms: 2000,
        }
    }
}

impl TimeoutConfig {
    /// Validate timeout bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.overall_seconds == 0 || self.overall_seconds > MAX_OVERALL_SECONDS {
            return Err(TimeoutValidationError::OverallOutOfBounds {
                value: self.overall_seconds,
            });
        }

        if self.termination_grace_ms > MAX_GRACE_MS {
            return Err(TimeoutValidationError::GraceOutOfBounds {
                value: self.termination_grace_ms,
            });
        }

        Ok(())
    }

    pub fn overall(&self) -> Duration {
        Duration::from_secs(self.overall_seconds)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("timeout_seconds must be in (0, 3600], got {value}")]
    OverallOutOfBounds { value: u64 },

    #[error("termination_grace_ms must be at most 60000, got {value}")]
    GraceOutOfBounds { value: u64 },
}

/// Timeout check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// Still within the limit
    Ok,
    /// Wall-clock limit reached
    Exceeded,
}

impl TimeoutStatus {
    /// Returns true if a timeout occurred
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutStatus::Exceeded)
    }
}

/// Tracks elapsed time for one session.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutEnforcer {
    limit: Duration,
    start_time: Instant,
}

impl TimeoutEnforcer {
    /// Start the clock now
    pub fn new(limit: Duration) -> Self {
        Self::started_at(limit, Instant::now())
    }

    /// Start the clock at a given instant
    pub fn started_at(limit: Duration, start_time: Instant) -> Self {
        Self { limit, start_time }
    }

    /// `Exceeded` once elapsed time is at or past the limit.
    pub fn check(&self) -> TimeoutStatus {
        if self.elapsed() >= self.limit {
            TimeoutStatus::Exceeded
        } else {
            TimeoutStatus::Ok
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }
}
