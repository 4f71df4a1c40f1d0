use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::circuit_breaker::CircuitState;
use crate::domain::duration_ms;
use crate::throttling::RateSnapshot;
use crate::{CanonicalMarket, ExchangeId, MarketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

impl Display for CacheStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured response metadata for the outer HTTP layer.
///
/// Header values: rate window and backoff are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservabilityHeaders {
    pub canonical_uuid: Uuid,
    pub exchange: ExchangeId,
    pub market_type: MarketType,
    pub cache_status: CacheStatus,
    pub rate_limit: RateSnapshot,
    pub circuit: CircuitState,
    /// Retries performed by the fetch, zero when the first attempt succeeded.
    pub retry_attempt: u32,
    #[serde(rename = "backoff_next_ms", with = "duration_ms::option")]
    pub backoff_next: Option<Duration>,
}

impl ObservabilityHeaders {
    pub fn new(
        canonical: &CanonicalMarket,
        cache_status: CacheStatus,
        rate_limit: RateSnapshot,
        circuit: CircuitState,
    ) -> Self {
        Self {
            canonical_uuid: canonical.uuid,
            exchange: canonical.exchange,
            market_type: canonical.market_type,
            cache_status,
            rate_limit,
            circuit,
            retry_attempt: 0,
            backoff_next: None,
        }
    }

    pub fn with_retry(mut self, retry_attempt: u32, backoff_next: Option<Duration>) -> Self {
        self.retry_attempt = retry_attempt;
        self.backoff_next = backoff_next;
        self
    }

    pub fn to_header_map(&self) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        headers.insert("X-Canonical-UUID", self.canonical_uuid.to_string());
        headers.insert("X-Canonical-Exchange", self.exchange.to_string());
        headers.insert("X-Canonical-Type", self.market_type.to_string());
        headers.insert("X-Cache-Status", self.cache_status.to_string());
        headers.insert("X-RateLimit-Limit", self.rate_limit.limit.to_string());
        headers.insert("X-RateLimit-Remaining", self.rate_limit.remaining.to_string());
        headers.insert(
            "X-RateLimit-Window",
            self.rate_limit.window.as_millis().to_string(),
        );
        headers.insert("X-Circuit-Status", self.circuit.to_string());
        headers.insert("X-Retry-Attempt", self.retry_attempt.to_string());
        if let Some(backoff) = self.backoff_next {
            headers.insert("X-Backoff-Next", backoff.as_millis().to_string());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{canonicalize, MarketQuery};

    #[test]
    fn header_map_uses_wire_names() {
        let canonical = canonicalize(
            &MarketQuery::new(ExchangeId::Bitmex, "XBTUSD", MarketType::Perpetual).expect("valid"),
        );
        let rate = RateSnapshot {
            limit: 60,
            remaining: 12,
            window: Duration::from_secs(60),
            reset_after: Duration::from_secs(7),
        };

        let headers = ObservabilityHeaders::new(&canonical, CacheStatus::Miss, rate, CircuitState::HalfOpen)
            .with_retry(2, Some(Duration::from_millis(4_200)))
            .to_header_map();

        assert_eq!(headers["X-Canonical-UUID"], canonical.uuid.to_string());
        assert_eq!(headers["X-Canonical-Exchange"], "bitmex");
        assert_eq!(headers["X-Canonical-Type"], "perpetual");
        assert_eq!(headers["X-Cache-Status"], "MISS");
        assert_eq!(headers["X-RateLimit-Limit"], "60");
        assert_eq!(headers["X-RateLimit-Remaining"], "12");
        assert_eq!(headers["X-RateLimit-Window"], "60000");
        assert_eq!(headers["X-Circuit-Status"], "half-open");
        assert_eq!(headers["X-Retry-Attempt"], "2");
        assert_eq!(headers["X-Backoff-Next"], "4200");
    }

    #[test]
    fn backoff_header_is_omitted_without_a_retry() {
        let canonical = canonicalize(
            &MarketQuery::new(ExchangeId::Polymarket, "m", MarketType::Binary).expect("valid"),
        );
        let headers = ObservabilityHeaders::new(
            &canonical,
            CacheStatus::Hit,
            RateSnapshot {
                limit: 100,
                remaining: 100,
                window: Duration::from_secs(60),
                reset_after: Duration::from_secs(60),
            },
            CircuitState::Closed,
        )
        .to_header_map();

        assert_eq!(headers["X-Cache-Status"], "HIT");
        assert!(!headers.contains_key("X-Backoff-Next"));
    }
}
