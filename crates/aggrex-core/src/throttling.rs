use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::duration_ms;

/// Fixed-window request quota for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per window.
    pub limit: u32,
    #[serde(with = "duration_ms")]
    pub window: Duration,
    /// Window volume at which the circuit is forced open; may sit below `limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_threshold: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            circuit_threshold: None,
        }
    }
}

/// Quota view reported to callers and observability headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateSnapshot {
    pub limit: u32,
    pub remaining: u32,
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    #[serde(rename = "reset_after_ms", with = "duration_ms")]
    pub reset_after: Duration,
}

/// Outcome of trying to take one slot from the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateSnapshot),
    Limited(RateSnapshot),
}

/// Fixed-window counter: `{count, reset_at}`.
#[derive(Debug, Clone)]
pub struct RateWindow {
    config: RateLimitConfig,
    count: u32,
    reset_at: Instant,
}

impl RateWindow {
    pub fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            config,
            count: 0,
            reset_at: now + config.window,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Calls counted in the current window.
    pub fn count_at(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.count
    }

    /// Count one call unless the window is already exhausted.
    pub fn try_acquire_at(&mut self, now: Instant) -> RateDecision {
        self.roll(now);
        if self.count >= self.config.limit {
            return RateDecision::Limited(self.snapshot(now));
        }

        self.count = self.count.saturating_add(1);
        RateDecision::Allowed(self.snapshot(now))
    }

    pub fn is_limited_at(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.count >= self.config.limit
    }

    /// Whether window volume has reached the configured circuit trip point.
    pub fn circuit_threshold_reached_at(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.config
            .circuit_threshold
            .is_some_and(|threshold| self.count >= threshold)
    }

    pub fn snapshot_at(&mut self, now: Instant) -> RateSnapshot {
        self.roll(now);
        self.snapshot(now)
    }

    pub fn reset(&mut self, now: Instant) {
        self.count = 0;
        self.reset_at = now + self.config.window;
    }

    fn roll(&mut self, now: Instant) {
        if now >= self.reset_at {
            self.reset(now);
        }
    }

    fn snapshot(&self, now: Instant) -> RateSnapshot {
        RateSnapshot {
            limit: self.config.limit,
            remaining: self.config.limit.saturating_sub(self.count),
            window: self.config.window,
            reset_after: self.reset_at.saturating_duration_since(now),
        }
    }
}
