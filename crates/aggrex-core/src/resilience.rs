//! Per-exchange resilience: fixed-window rate limiting, circuit breaking and
//! retry bookkeeping behind one admission check.
//!
//! Each exchange's breaker, rate window and retry states live under a single
//! mutex, so `admit` reads and updates them as one step: two concurrent
//! callers can never both see `count = limit - 1` and both proceed.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::domain::duration_ms;
use crate::retry::{RetryConfig, RetryDecision, RetryState, RetryTracker};
use crate::throttling::{RateDecision, RateSnapshot, RateWindow};
use crate::{ExchangeId, ExchangePolicy};

/// Outcome of the pre-call permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed; the snapshot already counts it.
    Allowed(RateSnapshot),
    /// Circuit is open, or half-open with every trial slot taken. Not counted
    /// against the rate window.
    CircuitOpen { retry_after: Duration },
    RateLimited {
        remaining: u32,
        limit: u32,
        reset_after: Duration,
    },
}

impl Admission {
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Operator-facing view of one exchange's resilience state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeStatus {
    pub exchange: ExchangeId,
    pub circuit: CircuitState,
    pub failures: u32,
    pub successes: u32,
    #[serde(
        rename = "retry_after_ms",
        with = "duration_ms::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_after: Option<Duration>,
    pub rate: RateSnapshot,
    pub rate_limited: bool,
    pub pending_retries: usize,
}

#[derive(Debug)]
struct ExchangeResilience {
    breaker: CircuitBreaker,
    window: RateWindow,
    retries: RetryTracker,
}

#[derive(Debug)]
struct ExchangeSlot {
    retry: RetryConfig,
    state: Mutex<ExchangeResilience>,
}

/// Resilience state for every known exchange.
#[derive(Debug)]
pub struct ResilienceManager {
    slots: BTreeMap<ExchangeId, ExchangeSlot>,
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl ResilienceManager {
    /// Build state for every exchange, falling back to built-in policies for
    /// exchanges missing from `policies`.
    pub fn new(policies: &BTreeMap<ExchangeId, ExchangePolicy>) -> Self {
        let now = Instant::now();
        let slots = ExchangeId::ALL
            .into_iter()
            .map(|exchange| {
                let policy = policies
                    .get(&exchange)
                    .cloned()
                    .unwrap_or_else(|| ExchangePolicy::default_for(exchange));
                let slot = ExchangeSlot {
                    retry: policy.retry,
                    state: Mutex::new(ExchangeResilience {
                        breaker: CircuitBreaker::new(policy.breaker),
                        window: RateWindow::new(policy.rate_limit, now),
                        retries: RetryTracker::default(),
                    }),
                };
                (exchange, slot)
            })
            .collect();

        Self { slots }
    }

    pub fn retry_config(&self, exchange: ExchangeId) -> RetryConfig {
        self.slot(exchange).retry
    }

    pub fn admit(&self, exchange: ExchangeId) -> Admission {
        self.admit_at(exchange, Instant::now())
    }

    /// Circuit check, then rate window, then the optional volume trip.
    ///
    /// An `Allowed` answer while half-open holds one of the breaker's trial
    /// slots; the caller must resolve it with `record_success`,
    /// `record_failure` or `release`.
    pub fn admit_at(&self, exchange: ExchangeId, now: Instant) -> Admission {
        let mut state = self.lock(exchange);
        observe_transition(exchange, &mut state.breaker, now);

        if let Some(retry_after) = state.breaker.retry_after_at(now) {
            debug!(%exchange, retry_after_ms = retry_after.as_millis() as u64, "circuit open; failing fast");
            return Admission::CircuitOpen { retry_after };
        }

        if !state.breaker.try_acquire_at(now) {
            debug!(%exchange, "half-open trial slots taken; failing fast");
            return Admission::CircuitOpen {
                retry_after: Duration::ZERO,
            };
        }

        match state.window.try_acquire_at(now) {
            RateDecision::Limited(snapshot) => {
                state.breaker.release_at(now);
                warn!(
                    %exchange,
                    limit = snapshot.limit,
                    reset_after_ms = snapshot.reset_after.as_millis() as u64,
                    "rate limit reached"
                );
                Admission::RateLimited {
                    remaining: snapshot.remaining,
                    limit: snapshot.limit,
                    reset_after: snapshot.reset_after,
                }
            }
            RateDecision::Allowed(snapshot) => {
                if state.window.circuit_threshold_reached_at(now) {
                    state.breaker.force_open_at(now);
                    warn!(
                        %exchange,
                        count = snapshot.limit - snapshot.remaining,
                        "request volume reached circuit threshold; opening circuit"
                    );
                }
                Admission::Allowed(snapshot)
            }
        }
    }

    pub fn record_success(&self, exchange: ExchangeId) {
        self.record_success_at(exchange, Instant::now());
    }

    pub fn record_success_at(&self, exchange: ExchangeId, now: Instant) {
        let mut state = self.lock(exchange);
        let before = observe_transition(exchange, &mut state.breaker, now).state;
        state.breaker.record_success_at(now);
        let after = state.breaker.state_at(now);
        if before != after {
            info!(%exchange, from = %before, to = %after, "circuit closed after successful trial calls");
        }
    }

    /// Resolve an admitted call that neither succeeded nor failed upstream,
    /// such as a cancellation or a missing market.
    pub fn release(&self, exchange: ExchangeId) {
        self.lock(exchange).breaker.release_at(Instant::now());
    }

    pub fn record_failure(&self, exchange: ExchangeId) {
        self.record_failure_at(exchange, Instant::now());
    }

    pub fn record_failure_at(&self, exchange: ExchangeId, now: Instant) {
        let mut state = self.lock(exchange);
        let before = observe_transition(exchange, &mut state.breaker, now).state;
        state.breaker.record_failure_at(now);
        let snapshot = state.breaker.snapshot_at(now);
        if before != snapshot.state {
            warn!(
                %exchange,
                from = %before,
                to = %snapshot.state,
                failures = snapshot.failures,
                "circuit opened"
            );
        }
    }

    pub fn circuit_state(&self, exchange: ExchangeId) -> CircuitState {
        self.circuit_state_at(exchange, Instant::now())
    }

    /// Reading the state applies the lazy `open -> half-open` transition.
    pub fn circuit_state_at(&self, exchange: ExchangeId, now: Instant) -> CircuitState {
        let mut state = self.lock(exchange);
        observe_transition(exchange, &mut state.breaker, now).state
    }

    pub fn is_rate_limited(&self, exchange: ExchangeId) -> bool {
        self.is_rate_limited_at(exchange, Instant::now())
    }

    pub fn is_rate_limited_at(&self, exchange: ExchangeId, now: Instant) -> bool {
        self.lock(exchange).window.is_limited_at(now)
    }

    /// Record a retry for `request_id` using the exchange's retry policy.
    pub fn record_retry(&self, exchange: ExchangeId, request_id: &str) -> RetryDecision {
        let config = self.retry_config(exchange);
        self.record_retry_with(exchange, request_id, &config)
    }

    /// Record a retry under an explicit attempt budget.
    pub fn record_retry_with(
        &self,
        exchange: ExchangeId,
        request_id: &str,
        config: &RetryConfig,
    ) -> RetryDecision {
        let decision = self
            .lock(exchange)
            .retries
            .record_retry_at(request_id, config, Instant::now());
        debug!(
            %exchange,
            request_id,
            attempt = decision.attempt,
            backoff_ms = decision.backoff.as_millis() as u64,
            can_retry = decision.can_retry,
            "retry recorded"
        );
        decision
    }

    pub fn clear_retry(&self, exchange: ExchangeId, request_id: &str) -> bool {
        self.lock(exchange).retries.clear(request_id)
    }

    pub fn retry_state(&self, exchange: ExchangeId, request_id: &str) -> Option<RetryState> {
        self.lock(exchange).retries.get(request_id)
    }

    pub fn snapshot(&self, exchange: ExchangeId) -> ExchangeStatus {
        self.snapshot_at(exchange, Instant::now())
    }

    pub fn snapshot_at(&self, exchange: ExchangeId, now: Instant) -> ExchangeStatus {
        let mut state = self.lock(exchange);
        let circuit = observe_transition(exchange, &mut state.breaker, now);
        let retry_after = state.breaker.retry_after_at(now);
        let rate_limited = state.window.is_limited_at(now);

        ExchangeStatus {
            exchange,
            circuit: circuit.state,
            failures: circuit.failures,
            successes: circuit.successes,
            retry_after,
            rate: state.window.snapshot_at(now),
            rate_limited,
            pending_retries: state.retries.len(),
        }
    }

    pub fn snapshots(&self) -> Vec<ExchangeStatus> {
        let now = Instant::now();
        ExchangeId::ALL
            .into_iter()
            .map(|exchange| self.snapshot_at(exchange, now))
            .collect()
    }

    /// Close the circuit, empty the rate window and drop retry states.
    pub fn reset(&self, exchange: ExchangeId) {
        let mut state = self.lock(exchange);
        state.breaker.reset();
        state.window.reset(Instant::now());
        state.retries.clear_all();
        info!(%exchange, "resilience state reset");
    }

    fn slot(&self, exchange: ExchangeId) -> &ExchangeSlot {
        // Every exchange gets a slot in `new`.
        &self.slots[&exchange]
    }

    fn lock(&self, exchange: ExchangeId) -> MutexGuard<'_, ExchangeResilience> {
        self.slot(exchange)
            .state
            .lock()
            .expect("resilience state should not be poisoned")
    }
}

/// Apply the lazy half-open transition, logging it when it fires.
fn observe_transition(
    exchange: ExchangeId,
    breaker: &mut CircuitBreaker,
    now: Instant,
) -> CircuitSnapshot {
    let before = breaker.current().state;
    let snapshot = breaker.snapshot_at(now);
    if before != snapshot.state {
        info!(%exchange, from = %before, to = %snapshot.state, "circuit half-open; admitting trial calls");
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::throttling::RateLimitConfig;

    fn manager_with(exchange: ExchangeId, rate_limit: RateLimitConfig) -> ResilienceManager {
        let mut policy = ExchangePolicy::default_for(exchange);
        policy.rate_limit = rate_limit;
        policy.breaker = CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        };
        let mut policies = BTreeMap::new();
        policies.insert(exchange, policy);
        ResilienceManager::new(&policies)
    }

    #[test]
    fn exhausting_the_window_reports_zero_remaining() {
        let manager = manager_with(
            ExchangeId::Kalshi,
            RateLimitConfig {
                limit: 3,
                window: Duration::from_secs(60),
                circuit_threshold: None,
            },
        );
        let now = Instant::now();

        for expected_remaining in [2, 1, 0] {
            match manager.admit_at(ExchangeId::Kalshi, now) {
                Admission::Allowed(snapshot) => assert_eq!(snapshot.remaining, expected_remaining),
                other => panic!("expected allowed, got {other:?}"),
            }
        }

        assert!(manager.is_rate_limited_at(ExchangeId::Kalshi, now));
        assert!(matches!(
            manager.admit_at(ExchangeId::Kalshi, now),
            Admission::RateLimited { remaining: 0, limit: 3, .. }
        ));
        assert!(!manager.is_rate_limited_at(ExchangeId::Polymarket, now));

        let later = now + Duration::from_secs(61);
        assert!(manager.admit_at(ExchangeId::Kalshi, later).is_allowed());
    }

    #[test]
    fn open_circuit_fails_fast_without_consuming_quota() {
        let manager = manager_with(
            ExchangeId::Polymarket,
            RateLimitConfig {
                limit: 10,
                window: Duration::from_secs(60),
                circuit_threshold: None,
            },
        );
        let now = Instant::now();

        for _ in 0..5 {
            manager.record_failure_at(ExchangeId::Polymarket, now);
        }
        assert_eq!(manager.circuit_state_at(ExchangeId::Polymarket, now), CircuitState::Open);

        let admission = manager.admit_at(ExchangeId::Polymarket, now + Duration::from_secs(10));
        assert_eq!(
            admission,
            Admission::CircuitOpen {
                retry_after: Duration::from_secs(20)
            }
        );
        assert_eq!(manager.snapshot_at(ExchangeId::Polymarket, now).rate.remaining, 10);
    }

    #[test]
    fn circuit_recovers_through_half_open_trial_calls() {
        let manager = manager_with(ExchangeId::Sports, RateLimitConfig::default());
        let now = Instant::now();
        for _ in 0..5 {
            manager.record_failure_at(ExchangeId::Sports, now);
        }

        let before_timeout = now + Duration::from_secs(29);
        assert_eq!(manager.circuit_state_at(ExchangeId::Sports, before_timeout), CircuitState::Open);

        let recovered = now + Duration::from_secs(30);
        assert_eq!(manager.circuit_state_at(ExchangeId::Sports, recovered), CircuitState::HalfOpen);
        assert!(manager.admit_at(ExchangeId::Sports, recovered).is_allowed());

        for _ in 0..3 {
            manager.record_success_at(ExchangeId::Sports, recovered);
        }
        assert_eq!(manager.circuit_state_at(ExchangeId::Sports, recovered), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_only_success_threshold_callers() {
        let manager = manager_with(ExchangeId::Kalshi, RateLimitConfig::default());
        let now = Instant::now();
        for _ in 0..5 {
            manager.record_failure_at(ExchangeId::Kalshi, now);
        }
        let after_timeout = now + Duration::from_secs(31);

        let admissions: Vec<Admission> = (0..50)
            .map(|_| manager.admit_at(ExchangeId::Kalshi, after_timeout))
            .collect();

        assert_eq!(admissions.iter().filter(|admission| admission.is_allowed()).count(), 3);
        assert!(admissions[3..]
            .iter()
            .all(|admission| matches!(admission, Admission::CircuitOpen { .. })));
        assert_eq!(
            manager.circuit_state_at(ExchangeId::Kalshi, after_timeout),
            CircuitState::HalfOpen
        );
        assert_eq!(manager.snapshot_at(ExchangeId::Kalshi, after_timeout).rate.remaining, 97);

        manager.record_success_at(ExchangeId::Kalshi, after_timeout);
        assert!(manager.admit_at(ExchangeId::Kalshi, after_timeout).is_allowed());
    }

    #[test]
    fn rate_limited_half_open_call_gives_back_its_slot() {
        let manager = manager_with(
            ExchangeId::Polymarket,
            RateLimitConfig {
                limit: 1,
                window: Duration::from_secs(60),
                circuit_threshold: None,
            },
        );
        let now = Instant::now();
        assert!(manager.admit_at(ExchangeId::Polymarket, now).is_allowed());
        for _ in 0..5 {
            manager.record_failure_at(ExchangeId::Polymarket, now);
        }

        let after_timeout = now + Duration::from_secs(31);
        for _ in 0..5 {
            assert!(matches!(
                manager.admit_at(ExchangeId::Polymarket, after_timeout),
                Admission::RateLimited { .. }
            ));
        }

        let next_window = now + Duration::from_secs(61);
        assert!(manager.admit_at(ExchangeId::Polymarket, next_window).is_allowed());
    }

    #[test]
    fn volume_threshold_forces_circuit_open() {
        let manager = manager_with(
            ExchangeId::Bitmex,
            RateLimitConfig {
                limit: 5,
                window: Duration::from_secs(60),
                circuit_threshold: Some(3),
            },
        );
        let now = Instant::now();

        for _ in 0..3 {
            assert!(manager.admit_at(ExchangeId::Bitmex, now).is_allowed());
        }

        assert_eq!(manager.circuit_state_at(ExchangeId::Bitmex, now), CircuitState::Open);
        assert!(matches!(
            manager.admit_at(ExchangeId::Bitmex, now),
            Admission::CircuitOpen { .. }
        ));
    }

    #[test]
    fn retry_states_are_scoped_to_request_ids() {
        let manager = ResilienceManager::default();

        let first = manager.record_retry(ExchangeId::Kalshi, "req-1");
        assert_eq!(first.attempt, 1);
        assert!(first.backoff >= Duration::from_millis(2_000));
        assert!(manager.retry_state(ExchangeId::Kalshi, "req-1").is_some());
        assert!(manager.retry_state(ExchangeId::Kalshi, "req-2").is_none());

        let second = manager.record_retry(ExchangeId::Kalshi, "req-1");
        assert_eq!(second.attempt, 2);
        assert!(second.backoff >= Duration::from_millis(4_000));

        let third = manager.record_retry(ExchangeId::Kalshi, "req-1");
        assert!(!third.can_retry);
        assert!(manager.retry_state(ExchangeId::Kalshi, "req-1").is_none());

        manager.record_retry(ExchangeId::Kalshi, "req-3");
        assert!(manager.clear_retry(ExchangeId::Kalshi, "req-3"));
        assert_eq!(manager.record_retry(ExchangeId::Kalshi, "req-3").attempt, 1);
    }

    #[test]
    fn reset_restores_a_clean_exchange() {
        let manager = ResilienceManager::default();
        for _ in 0..5 {
            manager.record_failure(ExchangeId::Polymarket);
        }
        manager.admit(ExchangeId::Polymarket);
        manager.record_retry(ExchangeId::Polymarket, "req");

        manager.reset(ExchangeId::Polymarket);

        let status = manager.snapshot(ExchangeId::Polymarket);
        assert_eq!(status.circuit, CircuitState::Closed);
        assert_eq!(status.failures, 0);
        assert_eq!(status.rate.remaining, status.rate.limit);
        assert_eq!(status.pending_retries, 0);
    }
}
