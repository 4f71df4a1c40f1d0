use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::duration_ms;

/// Runtime circuit state for exchange upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// How long an open circuit fails fast before letting trial calls through.
    /// Half-open admits at most `success_threshold` calls in flight.
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time breaker fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Consecutive failures; reset by any success.
    pub failures: u32,
    /// Consecutive successes while half-open.
    pub successes: u32,
    pub last_failure: Option<Instant>,
    pub next_attempt: Option<Instant>,
    /// Half-open trial calls admitted and not yet resolved.
    pub in_flight: u32,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            next_attempt: None,
            in_flight: 0,
        }
    }
}

/// Lazy `open -> half-open` transition, applied whenever the state is read.
///
/// Every other transition is driven by recorded outcomes; this one depends
/// only on the clock.
pub fn next_state(snapshot: CircuitSnapshot, now: Instant) -> CircuitSnapshot {
    match (snapshot.state, snapshot.next_attempt) {
        (CircuitState::Open, Some(next_attempt)) if now >= next_attempt => CircuitSnapshot {
            state: CircuitState::HalfOpen,
            successes: 0,
            next_attempt: None,
            in_flight: 0,
            ..snapshot
        },
        _ => snapshot,
    }
}

/// Circuit breaker state machine for one exchange.
///
/// Not synchronized on its own: the resilience manager holds it under the same
/// lock as the exchange's rate window so admission is a single atomic step.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    snapshot: CircuitSnapshot,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            snapshot: CircuitSnapshot::default(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored fields without applying the clock-driven transition.
    pub fn current(&self) -> CircuitSnapshot {
        self.snapshot
    }

    /// Current state, applying the lazy half-open transition first.
    pub fn state_at(&mut self, now: Instant) -> CircuitState {
        self.snapshot = next_state(self.snapshot, now);
        self.snapshot.state
    }

    pub fn snapshot_at(&mut self, now: Instant) -> CircuitSnapshot {
        self.snapshot = next_state(self.snapshot, now);
        self.snapshot
    }

    /// Whether a call may proceed at `now`. Does not reserve a half-open slot.
    pub fn allow_request_at(&mut self, now: Instant) -> bool {
        let snapshot = self.snapshot_at(now);
        match snapshot.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => snapshot.in_flight < self.config.success_threshold,
        }
    }

    /// Reserve a slot for one call. Closed always succeeds and open never does;
    /// half-open succeeds while fewer than `success_threshold` trial calls are
    /// unresolved. Every reserved half-open slot is released by
    /// `record_success_at`, `record_failure_at` or `release_at`.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        if !self.allow_request_at(now) {
            return false;
        }
        if self.snapshot.state == CircuitState::HalfOpen {
            self.snapshot.in_flight += 1;
        }
        true
    }

    /// Give back a slot for a call whose outcome says nothing about upstream health.
    pub fn release_at(&mut self, now: Instant) {
        let mut snapshot = next_state(self.snapshot, now);
        snapshot.in_flight = snapshot.in_flight.saturating_sub(1);
        self.snapshot = snapshot;
    }

    /// Remaining fail-fast time when open.
    pub fn retry_after_at(&mut self, now: Instant) -> Option<Duration> {
        let snapshot = self.snapshot_at(now);
        match snapshot.state {
            CircuitState::Open => snapshot
                .next_attempt
                .map(|next_attempt| next_attempt.saturating_duration_since(now)),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    pub fn record_success_at(&mut self, now: Instant) {
        let mut snapshot = next_state(self.snapshot, now);
        snapshot.failures = 0;
        snapshot.in_flight = snapshot.in_flight.saturating_sub(1);

        if snapshot.state == CircuitState::HalfOpen {
            snapshot.successes = snapshot.successes.saturating_add(1);
            if snapshot.successes >= self.config.success_threshold {
                snapshot.state = CircuitState::Closed;
                snapshot.successes = 0;
                snapshot.next_attempt = None;
                snapshot.in_flight = 0;
            }
        }

        self.snapshot = snapshot;
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        let mut snapshot = next_state(self.snapshot, now);
        snapshot.failures = snapshot.failures.saturating_add(1);
        snapshot.successes = 0;
        snapshot.last_failure = Some(now);
        snapshot.in_flight = snapshot.in_flight.saturating_sub(1);

        match snapshot.state {
            CircuitState::HalfOpen => {
                snapshot.state = CircuitState::Open;
                snapshot.next_attempt = Some(now + self.config.reset_timeout);
                snapshot.in_flight = 0;
            }
            CircuitState::Closed if snapshot.failures >= self.config.failure_threshold => {
                snapshot.state = CircuitState::Open;
                snapshot.next_attempt = Some(now + self.config.reset_timeout);
            }
            CircuitState::Closed | CircuitState::Open => {}
        }

        self.snapshot = snapshot;
    }

    /// Open the circuit regardless of failure count (volume-triggered trip).
    pub fn force_open_at(&mut self, now: Instant) {
        self.snapshot = CircuitSnapshot {
            state: CircuitState::Open,
            successes: 0,
            next_attempt: Some(now + self.config.reset_timeout),
            in_flight: 0,
            ..self.snapshot
        };
    }

    pub fn reset(&mut self) {
        self.snapshot = CircuitSnapshot::default();
    }
}
