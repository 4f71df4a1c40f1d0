//! # Aggrex Core
//!
//! Data-access backbone for a multi-exchange market aggregator.
//!
//! ## Overview
//!
//! This crate turns exchange-specific market references into one
//! deterministic identity and fetches their data safely:
//!
//! - **Canonicalizer**: `MarketQuery` to a version-5 UUID plus request metadata
//! - **Cache store**: per-exchange TTL and LRU/TTL eviction over a pluggable backend
//! - **Resilience manager**: fixed-window rate limits, circuit breakers, retry backoff
//! - **Fetch orchestrator**: composes the three around an [`ExchangeClient`]
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Response cache, memory and DuckDB backends |
//! | [`canonical`] | Canonical identity derivation |
//! | [`circuit_breaker`] | Circuit breaker state machine |
//! | [`config`] | Aggregator configuration and env overrides |
//! | [`domain`] | `MarketQuery`, timestamps, duration serde helpers |
//! | [`error`] | Core error types |
//! | [`exchange`] | Exchange and market type identifiers |
//! | [`exchange_client`] | Upstream call seam |
//! | [`fetch`] | Fetch orchestrator and batch fetch |
//! | [`headers`] | Observability headers |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`policy`] | Per-exchange policies |
//! | [`resilience`] | Admission checks over breaker, rate window and retries |
//! | [`retry`] | Exponential backoff bookkeeping |
//! | [`telemetry`] | Tracing subscriber setup |
//! | [`throttling`] | Fixed-window rate limiting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use aggrex_core::{
//!     AggregatorConfig, CacheStore, ExchangeId, FetchOptions, HttpExchangeClient, MarketFetcher,
//!     MarketQuery, MarketType, ReqwestHttpClient, ResilienceManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AggregatorConfig::load(None)?;
//!     let client = HttpExchangeClient::new(Arc::new(ReqwestHttpClient::new()), &config.exchanges);
//!     let fetcher = MarketFetcher::new(
//!         CacheStore::from_config(&config),
//!         Arc::new(ResilienceManager::new(&config.exchanges)),
//!         Arc::new(client),
//!         config.exchanges.clone(),
//!     );
//!
//!     let query = MarketQuery::new(ExchangeId::Kalshi, "INXD-24", MarketType::Binary)?;
//!     let result = fetcher.fetch(&query, &FetchOptions::default()).await?;
//!     println!("{} cached={}", result.canonical.uuid, result.cached);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Flow-control outcomes are values, not panics. [`FetchError`] separates
//! "try later" (rate limited, circuit open) from "no such market" and from
//! exhausted retries:
//!
//! ```rust
//! use aggrex_core::FetchError;
//!
//! fn status_for(error: &FetchError) -> u16 {
//!     match error {
//!         FetchError::RateLimited { .. } | FetchError::CircuitOpen { .. } => error.status_code(),
//!         FetchError::NotFound { .. } => 404,
//!         _ => 502,
//!     }
//! }
//! ```
//!
//! Cache faults never surface: the store degrades to memory and logs.

pub mod cache;
pub mod canonical;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod exchange_client;
pub mod fetch;
pub mod headers;
pub mod http_client;
pub mod policy;
pub mod resilience;
pub mod retry;
pub mod telemetry;
pub mod throttling;

// Canonical identity
pub use canonical::{canonicalize, endpoint_for, ApiMetadata, CanonicalMarket, CANONICALIZER_VERSION};

// Caching
pub use cache::{
    CacheBackend, CacheEntry, CacheError, CacheHit, CachePolicy, CacheStats, CacheStore,
    DuckDbBackend, EvictionStrategy, ExchangeCacheStats, InvalidateFilter, InvalidateRequest,
    MemoryBackend,
};

// Resilience
pub use circuit_breaker::{next_state, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use resilience::{Admission, ExchangeStatus, ResilienceManager};
pub use retry::{RetryConfig, RetryDecision, RetryState, RetryTracker};
pub use throttling::{RateDecision, RateLimitConfig, RateSnapshot, RateWindow};

// Configuration
pub use config::{AggregatorConfig, CacheBackendKind, CacheSettings, Environment, ResolvedCacheBackend};
pub use policy::ExchangePolicy;

// Domain models
pub use domain::{MarketQuery, MarketQueryBuilder, UtcDateTime};
pub use exchange::{ExchangeId, MarketType};

// Error types
pub use error::{CoreError, ValidationError};

// Fetching
pub use exchange_client::{ExchangeClient, ExchangeError, ExchangeFuture, HttpExchangeClient};
pub use fetch::{
    CancelSignal, FetchError, FetchOptions, FetchResult, MarketFetcher, DEFAULT_BATCH_CONCURRENCY,
};
pub use headers::{CacheStatus, ObservabilityHeaders};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient,
};

// Telemetry
pub use telemetry::{init_tracing, LogFormat};

// Warehouse (re-exported from aggrex-warehouse)
pub use aggrex_warehouse::{CacheWarehouse, WarehouseConfig, WarehouseError};
