//! Fixed-window accounting.
//!
//! A window is opened by the first request for a key and lives for exactly
//! `window_ms`. Every request inside it increments the count; the first request
//! after it has elapsed opens a fresh window with a count of one.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TollgateError;

/// Length of a daily quota window in milliseconds.
pub const DAY_MS: u64 = 86_400_000;

/// Limit and window length for one route category.
///
/// Both values are strictly positive; that is checked once, when the
/// configuration is built, so the request path never has to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRateLimitConfig")]
pub struct RateLimitConfig {
    limit: u32,
    window_ms: u64,
}

#[derive(Deserialize)]
struct RawRateLimitConfig {
    limit: u32,
    window_ms: u64,
}

impl TryFrom<RawRateLimitConfig> for RateLimitConfig {
    type Error = TollgateError;

    fn try_from(raw: RawRateLimitConfig) -> Result<Self, Self::Error> {
        RateLimitConfig::new(raw.limit, raw.window_ms)
    }
}

impl RateLimitConfig {
    /// Create a new config, rejecting a zero limit or a zero-length window.
    pub fn new(limit: u32, window_ms: u64) -> crate::error::Result<Self> {
        if limit == 0 {
            return Err(TollgateError::Config(
                "rate limit must be greater than zero".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(TollgateError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window_ms })
    }

    /// Built-in defaults only; both values must be non-zero.
    pub(crate) const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window_ms: 60_000,
        }
    }

    /// A 24-hour window, with the limit clamped to at least one.
    pub fn per_day(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            window_ms: DAY_MS,
        }
    }

    /// Maximum requests allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Copy of this config with a different limit, clamped to at least one.
    pub(crate) fn with_limit(&self, limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            window_ms: self.window_ms,
        }
    }
}

/// Outcome of a single check against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request fits in the current window
    pub success: bool,
    /// The limit the request was checked against
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix seconds at which the current window ends
    pub reset_at: u64,
    /// Seconds until the window ends, only set on a denial
    pub retry_after: Option<u64>,
}

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Requests seen in the current window, including denied ones
    pub count: u64,
    /// Epoch milliseconds at which the current window opened
    pub window_start: u64,
}

impl WindowEntry {
    /// Open a window at `now_ms` holding its first request.
    pub fn open(now_ms: u64) -> Self {
        Self {
            count: 1,
            window_start: now_ms,
        }
    }

    /// Milliseconds since this window opened.
    pub fn age(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.window_start)
    }

    /// Record one request, opening a new window if the current one has elapsed.
    pub fn record(&mut self, now_ms: u64, config: RateLimitConfig) -> RateLimitResult {
        if self.age(now_ms) >= config.window_ms() {
            *self = WindowEntry::open(now_ms);
        } else {
            self.count = self.count.saturating_add(1);
        }
        self.result(now_ms, config)
    }

    /// Describe the window as it stands after the latest request.
    pub fn result(&self, now_ms: u64, config: RateLimitConfig) -> RateLimitResult {
        let limit = config.limit();
        let window_end = self.window_start.saturating_add(config.window_ms());
        let reset_at = window_end.div_ceil(1000);

        if self.count > u64::from(limit) {
            return RateLimitResult {
                success: false,
                limit,
                remaining: 0,
                reset_at,
                retry_after: Some(window_end.saturating_sub(now_ms).div_ceil(1000)),
            };
        }

        RateLimitResult {
            success: true,
            limit,
            remaining: remaining(limit, self.count),
            reset_at,
            retry_after: None,
        }
    }
}

/// `max(0, limit - count)`.
pub fn remaining(limit: u32, count: u64) -> u32 {
    // The difference is at most `limit`, so it always fits.
    u64::from(limit).saturating_sub(count) as u32
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock that only moves when told to. Used by tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
