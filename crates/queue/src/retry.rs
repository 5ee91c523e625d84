//! Retry policy: retry ceiling and the backoff schedule between attempts.

use std::time::Duration;

use herald_common::{HeraldError, HeraldResult};

/// Failed attempts before a notification is permanently failed.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Backoff schedule in seconds: 30s, 1m, 2m, 5m, 15m, capped at 1h.
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 6] = [30, 60, 120, 300, 900, 3600];

/// Retry policy for failed deliveries.
///
/// The schedule is ascending; failures past its end reuse the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    schedule: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, schedule: Vec<Duration>) -> HeraldResult<Self> {
        if max_retries == 0 {
            return Err(HeraldError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if schedule.is_empty() {
            return Err(HeraldError::Config(
                "backoff schedule must not be empty".to_string(),
            ));
        }
        if schedule.windows(2).any(|w| w[1] < w[0]) {
            return Err(HeraldError::Config(
                "backoff schedule must be ascending".to_string(),
            ));
        }
        Ok(Self {
            max_retries,
            schedule,
        })
    }

    /// Default schedule with a custom retry ceiling.
    pub fn with_max_retries(max_retries: u32) -> HeraldResult<Self> {
        Self::new(
            max_retries,
            DEFAULT_BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the next attempt, given the retry count after the failure.
    ///
    /// `retry_count = 1` (first failure) maps to the first schedule entry.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let index = (retry_count.saturating_sub(1) as usize).min(self.schedule.len() - 1);
        self.schedule[index]
    }

    /// Whether a record with this many failed attempts is out of retries.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            schedule: DEFAULT_BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}
