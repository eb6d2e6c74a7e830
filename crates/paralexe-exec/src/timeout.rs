//! Timeout enforcement for a single command.
//!
//! Commands run unbounded unless `overall_seconds` is set. When the limit is
//! hit, the executor terminates the child (SIGTERM, then SIGKILL after
//! `grace_seconds`) and reports `ExecError::TimedOut`.

use std::time::{Duration, Instant};

use serde::Deserialize;

/// Upper bound accepted for `overall_seconds` (one week).
pub const MAX_OVERALL_SECONDS: u64 = 7 * 24 * 3600;

/// Upper bound accepted for `grace_seconds`.
pub const MAX_GRACE_SECONDS: u64 = 300;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time per command (default: none)
    #[serde(default)]
    pub overall_seconds: Option<u64>,

    /// Time between SIGTERM and SIGKILL (default: 10)
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

fn default_grace_seconds() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            overall_seconds: None,
            grace_seconds: default_grace_seconds(),
        }
    }
}

impl TimeoutConfig {
    /// Validate bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if let Some(overall) = self.overall_seconds {
            if overall == 0 || overall > MAX_OVERALL_SECONDS {
                return Err(TimeoutValidationError::OverallOutOfBounds { value: overall });
            }
        }

        if self.grace_seconds > MAX_GRACE_SECONDS {
            return Err(TimeoutValidationError::GraceOutOfBounds {
                value: self.grace_seconds,
            });
        }

        Ok(())
    }

    pub fn overall(&self) -> Option<Duration> {
        self.overall_seconds.map(Duration::from_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("timeout_seconds must be in (0, {}], got {value}", MAX_OVERALL_SECONDS)]
    OverallOutOfBounds { value: u64 },

    #[error("grace_seconds must be at most {}, got {value}", MAX_GRACE_SECONDS)]
    GraceOutOfBounds { value: u64 },
}

/// Tracks wall-clock time for one running command.
///
/// The enforcer only reports; terminating the child is the caller's job.
#[derive(Debug)]
pub struct TimeoutEnforcer {
    limit: Option<Duration>,
    start_time: Instant,
}

impl TimeoutEnforcer {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            limit,
            start_time: Instant::now(),
        }
    }

    /// The limit, once it has been exceeded.
    pub fn exceeded(&self) -> Option<Duration> {
        self.limit.filter(|&limit| self.start_time.elapsed() > limit)
    }
}
