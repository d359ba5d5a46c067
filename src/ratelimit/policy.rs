//! Rate limit policy and decision types.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, TurnstileError};

/// Default maximum number of requests per window.
pub const DEFAULT_LIMIT: u64 = 4;
/// Default window length in seconds.
pub const DEFAULT_PERIOD_SECS: u64 = 10;
/// Longest window accepted, in seconds (one year).
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

/// A fixed-window rate limit: at most `limit` requests per `period` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    limit: u64,
    period_secs: u64,
}

impl RateLimitPolicy {
    /// Create a policy, rejecting a zero limit and a period outside
    /// `1..=MAX_PERIOD_SECS`.
    pub fn new(limit: u64, period_secs: u64) -> Result<Self> {
        if limit == 0 {
            return Err(TurnstileError::Config("limit must be > 0".to_string()));
        }
        if period_secs == 0 {
            return Err(TurnstileError::Config("period must be > 0".to_string()));
        }
        if period_secs > MAX_PERIOD_SECS {
            return Err(TurnstileError::Config(format!(
                "period must not exceed {} seconds",
                MAX_PERIOD_SECS
            )));
        }
        Ok(Self { limit, period_secs })
    }

    /// Maximum requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in seconds.
    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    /// Window length as a duration.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Quota left after `count` requests in the current window.
    pub fn remaining(&self, count: u64) -> u64 {
        self.limit.saturating_sub(count)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            period_secs: DEFAULT_PERIOD_SECS,
        }
    }
}

/// The outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Seconds to wait before retrying; 0 when allowed
    pub retry_after_secs: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Seconds until the current window resets
    pub time_left_secs: u64,
}

impl Decision {
    /// An admitted request.
    pub fn allow(remaining: u64, time_left_secs: u64) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            remaining,
            time_left_secs,
        }
    }

    /// A rejected request; the window resets in `retry_after_secs`.
    pub fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
            remaining: 0,
            time_left_secs: retry_after_secs,
        }
    }
}

/// Remaining quota and time until reset for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Requests left in the current window
    pub remaining: u64,
    /// Seconds until the current window resets
    pub time_left_secs: u64,
}
