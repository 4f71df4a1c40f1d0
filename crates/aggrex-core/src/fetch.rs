//! Fetch orchestrator: canonicalize, consult the cache, pass the resilience
//! checks, call the exchange, populate the cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::domain::duration_ms;
use crate::exchange_client::{ExchangeClient, ExchangeError};
use crate::headers::{CacheStatus, ObservabilityHeaders};
use crate::resilience::{Admission, ResilienceManager};
use crate::{canonicalize, CanonicalMarket, ExchangeId, ExchangePolicy, MarketQuery};

/// Method recorded for cached exchange responses.
pub const FETCH_METHOD: &str = "GET";

/// Default number of in-flight exchange calls during a batch fetch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Caller-owned abort handle shared by clones.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`CancelSignal::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Per-call fetch knobs. Unset values fall back to the exchange policy.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub use_cache: bool,
    pub force_refresh: bool,
    /// Per-attempt exchange call timeout.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt.
    pub retries: Option<u32>,
    /// Correlation id for retry bookkeeping; generated when absent.
    pub request_id: Option<String>,
    pub cancel: Option<CancelSignal>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            timeout: None,
            retries: None,
            request_id: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub data: Value,
    pub canonical: CanonicalMarket,
    pub cached: bool,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    /// Exchange calls made; zero for a cache hit.
    pub attempts: u32,
    pub headers: ObservabilityHeaders,
}

/// Terminal outcome of a fetch that produced no data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{exchange} rate limit reached ({remaining} remaining); retry in {}s", retry_after.as_secs())]
    RateLimited {
        exchange: ExchangeId,
        remaining: u32,
        retry_after: Duration,
    },

    #[error("{exchange} circuit is open; retry in {}s", retry_after.as_secs())]
    CircuitOpen {
        exchange: ExchangeId,
        retry_after: Duration,
    },

    #[error("{exchange} has no market `{market_id}`")]
    NotFound {
        exchange: ExchangeId,
        market_id: String,
    },

    #[error("fetching `{market_id}` from {exchange} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        exchange: ExchangeId,
        market_id: String,
        attempts: u32,
        last_error: ExchangeError,
    },

    #[error("fetching `{market_id}` from {exchange} was cancelled")]
    Cancelled {
        exchange: ExchangeId,
        market_id: String,
    },
}

impl FetchError {
    pub const fn exchange(&self) -> ExchangeId {
        match self {
            Self::RateLimited { exchange, .. }
            | Self::CircuitOpen { exchange, .. }
            | Self::NotFound { exchange, .. }
            | Self::Exhausted { exchange, .. }
            | Self::Cancelled { exchange, .. } => *exchange,
        }
    }

    /// HTTP-like status for outer layers.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited { .. } => 429,
            Self::CircuitOpen { .. } => 503,
            Self::NotFound { .. } => 404,
            Self::Exhausted { .. } => 502,
            Self::Cancelled { .. } => 499,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::NotFound { .. } => "not_found",
            Self::Exhausted { .. } => "exhausted",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// When the caller may usefully try again.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            Self::NotFound { .. } | Self::Exhausted { .. } | Self::Cancelled { .. } => None,
        }
    }
}

enum CallError {
    Cancelled,
    Exchange(ExchangeError),
}

/// An admitted exchange call. Dropping it without recording an outcome
/// releases its breaker slot, so cancelled or dropped fetches and missing
/// markets never hold a half-open slot.
struct AdmittedCall<'a> {
    resilience: &'a ResilienceManager,
    exchange: ExchangeId,
    resolved: bool,
}

impl<'a> AdmittedCall<'a> {
    fn new(resilience: &'a ResilienceManager, exchange: ExchangeId) -> Self {
        Self {
            resilience,
            exchange,
            resolved: false,
        }
    }

    fn succeeded(mut self) {
        self.resolved = true;
        self.resilience.record_success(self.exchange);
    }

    fn failed(mut self) {
        self.resolved = true;
        self.resilience.record_failure(self.exchange);
    }
}

impl Drop for AdmittedCall<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.resilience.release(self.exchange);
        }
    }
}

/// Composes cache, resilience manager and exchange client.
pub struct MarketFetcher {
    cache: CacheStore,
    resilience: Arc<ResilienceManager>,
    client: Arc<dyn ExchangeClient>,
    policies: BTreeMap<ExchangeId, ExchangePolicy>,
    batch_concurrency: usize,
}

impl MarketFetcher {
    pub fn new(
        cache: CacheStore,
        resilience: Arc<ResilienceManager>,
        client: Arc<dyn ExchangeClient>,
        policies: BTreeMap<ExchangeId, ExchangePolicy>,
    ) -> Self {
        Self {
            cache,
            resilience,
            client,
            policies,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn resilience(&self) -> &ResilienceManager {
        &self.resilience
    }

    pub fn policy(&self, exchange: ExchangeId) -> ExchangePolicy {
        self.policies
            .get(&exchange)
            .cloned()
            .unwrap_or_else(|| ExchangePolicy::default_for(exchange))
    }

    pub async fn fetch(
        &self,
        query: &MarketQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult, FetchError> {
        self.fetch_canonical(canonicalize(query), options).await
    }

    pub async fn fetch_canonical(
        &self,
        canonical: CanonicalMarket,
        options: &FetchOptions,
    ) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let exchange = canonical.exchange;
        let endpoint = canonical.api_metadata.endpoint.clone();

        if options.use_cache && !options.force_refresh {
            if let Some(hit) = self
                .cache
                .get(canonical.uuid, Some(&endpoint), FETCH_METHOD)
                .await
            {
                let latency = started.elapsed();
                let status = self.resilience.snapshot(exchange);
                let headers =
                    ObservabilityHeaders::new(&canonical, CacheStatus::Hit, status.rate, status.circuit);
                debug!(%exchange, uuid = %canonical.uuid, hit_count = hit.hit_count, "cache hit");
                return Ok(FetchResult {
                    data: hit.data,
                    canonical,
                    cached: true,
                    latency,
                    attempts: 0,
                    headers,
                });
            }
        }

        let exchange_retry = self.resilience.retry_config(exchange);
        let retry = match options.retries {
            Some(retries) => exchange_retry.with_max_attempts(retries.saturating_add(1)),
            None => exchange_retry,
        };
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.policy(exchange).request_timeout);
        let request_id = options
            .request_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", canonical.uuid, Uuid::new_v4()));

        let mut attempts = 0_u32;
        let mut last_backoff = None;
        loop {
            let rate = match self.resilience.admit(exchange) {
                Admission::Allowed(rate) => rate,
                Admission::CircuitOpen { retry_after } => {
                    self.resilience.clear_retry(exchange, &request_id);
                    return Err(FetchError::CircuitOpen {
                        exchange,
                        retry_after,
                    });
                }
                Admission::RateLimited {
                    remaining,
                    reset_after,
                    ..
                } => {
                    self.resilience.clear_retry(exchange, &request_id);
                    return Err(FetchError::RateLimited {
                        exchange,
                        remaining,
                        retry_after: reset_after,
                    });
                }
            };
            let call = AdmittedCall::new(&self.resilience, exchange);

            attempts += 1;
            match self
                .call_exchange(&canonical, timeout, options.cancel.as_ref())
                .await
            {
                Ok(data) => {
                    call.succeeded();
                    self.resilience.clear_retry(exchange, &request_id);
                    self.cache
                        .set(&canonical, &endpoint, FETCH_METHOD, data.clone(), 200)
                        .await;

                    let circuit = self.resilience.circuit_state(exchange);
                    let headers = ObservabilityHeaders::new(&canonical, CacheStatus::Miss, rate, circuit)
                        .with_retry(attempts - 1, last_backoff);
                    debug!(%exchange, uuid = %canonical.uuid, attempts, "fetched from exchange");
                    return Ok(FetchResult {
                        data,
                        canonical,
                        cached: false,
                        latency: started.elapsed(),
                        attempts,
                        headers,
                    });
                }
                Err(CallError::Cancelled) => {
                    self.resilience.clear_retry(exchange, &request_id);
                    info!(%exchange, market_id = %canonical.native_id, "fetch cancelled by caller");
                    return Err(FetchError::Cancelled {
                        exchange,
                        market_id: canonical.native_id,
                    });
                }
                Err(CallError::Exchange(error)) if !error.is_failure() => {
                    self.resilience.clear_retry(exchange, &request_id);
                    return Err(FetchError::NotFound {
                        exchange,
                        market_id: canonical.native_id,
                    });
                }
                Err(CallError::Exchange(error)) => {
                    call.failed();
                    let decision = self
                        .resilience
                        .record_retry_with(exchange, &request_id, &retry);
                    if !decision.can_retry {
                        warn!(%exchange, market_id = %canonical.native_id, attempts, %error, "fetch attempts exhausted");
                        return Err(FetchError::Exhausted {
                            exchange,
                            market_id: canonical.native_id,
                            attempts,
                            last_error: error,
                        });
                    }

                    warn!(
                        %exchange,
                        market_id = %canonical.native_id,
                        attempt = decision.attempt,
                        backoff_ms = decision.backoff.as_millis() as u64,
                        %error,
                        "exchange call failed; backing off"
                    );
                    last_backoff = Some(decision.backoff);
                    if sleep_or_cancel(decision.backoff, options.cancel.as_ref()).await {
                        self.resilience.clear_retry(exchange, &request_id);
                        return Err(FetchError::Cancelled {
                            exchange,
                            market_id: canonical.native_id,
                        });
                    }
                }
            }
        }
    }

    /// Fetch many markets, one upstream call per distinct canonical UUID.
    ///
    /// Failed items are logged and left out of the result.
    pub async fn fetch_batch(
        &self,
        queries: &[MarketQuery],
        options: &FetchOptions,
    ) -> HashMap<Uuid, FetchResult> {
        let mut seen = HashSet::new();
        let markets = queries
            .iter()
            .map(canonicalize)
            .filter(|market| seen.insert(market.uuid))
            .collect::<Vec<_>>();
        let item_options = FetchOptions {
            request_id: None,
            ..options.clone()
        };

        let outcomes = stream::iter(markets)
            .map(|market| {
                let item_options = &item_options;
                async move {
                    let uuid = market.uuid;
                    (uuid, self.fetch_canonical(market, item_options).await)
                }
            })
            .buffer_unordered(self.batch_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut results = HashMap::with_capacity(outcomes.len());
        for (uuid, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    results.insert(uuid, result);
                }
                Err(error) => {
                    warn!(%uuid, exchange = %error.exchange(), code = error.code(), %error, "batch item failed");
                }
            }
        }
        results
    }

    async fn call_exchange(
        &self,
        canonical: &CanonicalMarket,
        timeout: Duration,
        cancel: Option<&CancelSignal>,
    ) -> Result<Value, CallError> {
        let call = tokio::time::timeout(timeout, self.client.fetch_market(canonical, timeout));
        let outcome = match cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(CallError::Cancelled),
                    outcome = call => outcome,
                }
            }
            None => call.await,
        };

        match outcome {
            Ok(result) => result.map_err(CallError::Exchange),
            Err(_elapsed) => Err(CallError::Exchange(ExchangeError::Timeout {
                exchange: canonical.exchange,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })),
        }
    }
}

/// Sleep for `delay`; returns `true` if the signal fired first.
async fn sleep_or_cancel(delay: Duration, cancel: Option<&CancelSignal>) -> bool {
    match cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(delay) => false,
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            false
        }
    }
}
