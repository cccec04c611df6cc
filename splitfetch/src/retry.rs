//! Per-range retry policy.
//!
//! Range fetchers never retry on their own. After a failed attempt the
//! coordinator asks [`RetryPolicy::next_delay`] whether the same range gets
//! another attempt and how long to wait first. Only failures that
//! [`FetchFailure::is_transient`] reports are retried, and each retry stages
//! into a fresh file.
//!
//! ```
//! use std::time::Duration;
//! use splitfetch::{FetchFailure, RetryPolicy};
//!
//! let policy = RetryPolicy::doubling(2, Duration::from_millis(50));
//! let short = FetchFailure::ShortRead { expected: 10, actual: 3 };
//!
//! assert_eq!(policy.next_delay(&short, 1), Some(Duration::from_millis(50)));
//! assert_eq!(policy.next_delay(&short, 2), Some(Duration::from_millis(100)));
//! assert_eq!(policy.next_delay(&short, 3), None);
//! ```

use std::time::Duration;

use crate::error::FetchFailure;

/// Upper bound on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// How the wait grows between attempts of one range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same wait before every retry.
    Constant(Duration),
    /// Wait doubles after each retry, capped at [`MAX_RETRY_DELAY`].
    Doubling(Duration),
}

/// Whether, and after how long, a failed range is attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Never retry; the first failed range ends the job.
    pub const fn none() -> Self {
        Self {
            retries: 0,
            backoff: Backoff::Constant(Duration::ZERO),
        }
    }

    /// Up to `retries` extra attempts per range, `delay` apart.
    pub const fn constant(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            backoff: Backoff::Constant(delay),
        }
    }

    /// Up to `retries` extra attempts per range, waiting `initial` before
    /// the first and doubling after each.
    pub const fn doubling(retries: u32, initial: Duration) -> Self {
        Self {
            retries,
            backoff: Backoff::Doubling(initial),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay before retrying a range whose attempt number `failed_attempts`
    /// (1-based) ended in `failure`, or `None` to give up.
    pub fn next_delay(&self, failure: &FetchFailure, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts > self.retries || !failure.is_transient() {
            return None;
        }

        let delay = match self.backoff {
            Backoff::Constant(delay) => delay,
            Backoff::Doubling(initial) => {
                let factor = 1u32.checked_shl(failed_attempts - 1).unwrap_or(u32::MAX);
                initial.saturating_mul(factor)
            }
        };
        Some(delay.min(MAX_RETRY_DELAY))
    }
}
