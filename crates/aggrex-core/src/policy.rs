use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CachePolicy, EvictionStrategy};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::domain::duration_ms;
use crate::retry::RetryConfig;
use crate::throttling::RateLimitConfig;
use crate::ExchangeId;

/// Everything the aggregator needs to know about one upstream exchange.
///
/// A config file entry may name only some fields; `AggregatorConfig::from_json`
/// fills the rest from [`ExchangePolicy::default_for`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePolicy {
    pub base_url: String,
    pub cache: CachePolicy,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl ExchangePolicy {
    pub fn polymarket_default() -> Self {
        Self {
            base_url: String::from("https://gamma-api.polymarket.com"),
            cache: CachePolicy {
                ttl: Duration::from_secs(600),
                max_size: 1000,
                strategy: EvictionStrategy::Lru,
            },
            rate_limit: RateLimitConfig {
                limit: 100,
                window: Duration::from_secs(60),
                circuit_threshold: None,
            },
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn kalshi_default() -> Self {
        Self {
            base_url: String::from("https://api.elections.kalshi.com"),
            cache: CachePolicy {
                ttl: Duration::from_secs(300),
                max_size: 500,
                strategy: EvictionStrategy::Lru,
            },
            rate_limit: RateLimitConfig {
                limit: 50,
                window: Duration::from_secs(60),
                circuit_threshold: None,
            },
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Perpetual order books move fast: short TTL, and sustained volume near
    /// the quota trips the breaker before BitMEX starts rejecting.
    pub fn bitmex_default() -> Self {
        Self {
            base_url: String::from("https://www.bitmex.com"),
            cache: CachePolicy {
                ttl: Duration::from_secs(30),
                max_size: 200,
                strategy: EvictionStrategy::Ttl,
            },
            rate_limit: RateLimitConfig {
                limit: 60,
                window: Duration::from_secs(60),
                circuit_threshold: Some(55),
            },
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn sports_default() -> Self {
        Self {
            base_url: String::from("https://api.the-odds-api.com"),
            cache: CachePolicy {
                ttl: Duration::from_secs(120),
                max_size: 500,
                strategy: EvictionStrategy::Lru,
            },
            rate_limit: RateLimitConfig {
                limit: 30,
                window: Duration::from_secs(60),
                circuit_threshold: None,
            },
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn default_for(exchange: ExchangeId) -> Self {
        match exchange {
            ExchangeId::Polymarket => Self::polymarket_default(),
            ExchangeId::Kalshi => Self::kalshi_default(),
            ExchangeId::Bitmex => Self::bitmex_default(),
            ExchangeId::Sports => Self::sports_default(),
        }
    }
}
