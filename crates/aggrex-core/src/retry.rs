//! Retry bookkeeping with exponential backoff and jitter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::duration_ms;

/// Configuration for retrying failed exchange calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed per logical request; `can_retry` is `attempt < max_attempts`.
    pub max_attempts: u32,
    /// The initial backoff duration.
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// The maximum backoff before jitter is added.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Upper bound of random jitter, as a fraction of the capped delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Copy of this config with a different attempt budget.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// `min(base_delay * 2^attempt, max_delay)`, without jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let scale = 2_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let seconds = self.base_delay.as_secs_f64() * scale;
        Duration::from_secs_f64(seconds.min(self.max_delay.as_secs_f64()))
    }

    /// Capped delay plus up to `jitter` of itself in random extra wait.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return capped;
        }

        let extra = capped.as_secs_f64() * jitter * fastrand::f64();
        capped + Duration::from_secs_f64(extra)
    }
}

/// Retry progress for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub next_backoff: Duration,
    pub last_attempt: Instant,
}

/// Result of recording one retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryDecision {
    pub attempt: u32,
    #[serde(rename = "backoff_ms", with = "duration_ms")]
    pub backoff: Duration,
    pub can_retry: bool,
}

/// Retry states keyed by request/correlation id.
///
/// Exhausted states are dropped as soon as they are reported, and callers
/// clear states on success, so ids never carry attempts across requests.
#[derive(Debug, Default)]
pub struct RetryTracker {
    states: HashMap<String, RetryState>,
}

impl RetryTracker {
    pub fn record_retry_at(
        &mut self,
        request_id: &str,
        config: &RetryConfig,
        now: Instant,
    ) -> RetryDecision {
        let attempt = self
            .states
            .get(request_id)
            .map_or(1, |state| state.attempt.saturating_add(1));
        let backoff = config.delay_for_attempt(attempt);
        let can_retry = attempt < config.max_attempts;

        if can_retry {
            self.states.insert(
                request_id.to_owned(),
                RetryState {
                    attempt,
                    next_backoff: backoff,
                    last_attempt: now,
                },
            );
        } else {
            self.states.remove(request_id);
        }

        RetryDecision {
            attempt,
            backoff,
            can_retry,
        }
    }

    pub fn clear(&mut self, request_id: &str) -> bool {
        self.states.remove(request_id).is_some()
    }

    pub fn get(&self, request_id: &str) -> Option<RetryState> {
        self.states.get(request_id).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear_all(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_delay_doubles_until_max() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        };

        assert_eq!(config.capped_delay(0), Duration::from_millis(100));
        assert_eq!(config.capped_delay(1), Duration::from_millis(200));
        assert_eq!(config.capped_delay(2), Duration::from_millis(400));
        assert_eq!(config.capped_delay(3), Duration::from_millis(800));
        assert_eq!(config.capped_delay(4), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            for attempt in 0..6 {
                let capped = config.capped_delay(attempt).as_secs_f64();
                let delay = config.delay_for_attempt(attempt).as_secs_f64();
                assert!(delay >= capped, "attempt={attempt}, delay={delay}");
                assert!(delay <= capped * 1.1 + 1e-9, "attempt={attempt}, delay={delay}");
            }
        }
    }

    #[test]
    fn tracker_grows_backoff_and_stops_at_max_attempts() {
        let config = RetryConfig::default();
        let mut tracker = RetryTracker::default();
        let now = Instant::now();

        let first = tracker.record_retry_at("req-1", &config, now);
        assert_eq!(first.attempt, 1);
        assert!(first.backoff >= Duration::from_millis(2_000));
        assert!(first.can_retry);

        let second = tracker.record_retry_at("req-1", &config, now);
        assert_eq!(second.attempt, 2);
        assert!(second.backoff >= Duration::from_millis(4_000));
        assert!(second.can_retry);

        let third = tracker.record_retry_at("req-1", &config, now);
        assert_eq!(third.attempt, 3);
        assert!(!third.can_retry);
        assert!(tracker.get("req-1").is_none(), "exhausted state is dropped");
    }

    #[test]
    fn cleared_ids_start_over() {
        let config = RetryConfig::default();
        let mut tracker = RetryTracker::default();
        let now = Instant::now();

        tracker.record_retry_at("req-1", &config, now);
        tracker.record_retry_at("req-2", &config, now);
        assert!(tracker.clear("req-1"));
        assert_eq!(tracker.len(), 1);

        let fresh = tracker.record_retry_at("req-1", &config, now);
        assert_eq!(fresh.attempt, 1);
    }
}
