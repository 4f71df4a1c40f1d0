//! Response cache keyed by canonical market UUID.
//!
//! [`CacheStore`] owns the policy (per-exchange TTL, size cap, eviction order)
//! and the hit/miss counters; storage sits behind [`CacheBackend`] so the same
//! store runs over [`MemoryBackend`] or the DuckDB-backed [`DuckDbBackend`].
//!
//! The cache is an optimization. Backend faults never reach callers: the
//! first failure switches the store to its in-memory fallback for the rest of
//! the process lifetime and every read degrades to a miss at worst.

mod duckdb;
mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AggregatorConfig, ResolvedCacheBackend};
use crate::domain::duration_ms;
use crate::{CanonicalMarket, ExchangeId, UtcDateTime};

pub use self::duckdb::DuckDbBackend;
pub use self::memory::MemoryBackend;

const HEADERS_NAMESPACE: Uuid = Uuid::from_u128(0x0e7a_91c4_5f2b_4d36_a8e1_3b9c_72d5_4f08);

/// Order in which an exchange's entries are evicted once it exceeds `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently accessed first.
    Lru,
    /// Closest to expiry first.
    Ttl,
}

/// Per-exchange cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    pub max_size: usize,
    pub strategy: EvictionStrategy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 500,
            strategy: EvictionStrategy::Lru,
        }
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub canonical_uuid: Uuid,
    pub exchange: ExchangeId,
    pub endpoint: String,
    pub method: String,
    pub headers_hash: String,
    pub response: Value,
    pub status: u16,
    pub cached_at: UtcDateTime,
    pub expires_at: UtcDateTime,
    pub tags: BTreeSet<String>,
    pub hit_count: u64,
    pub last_accessed: UtcDateTime,
    /// Serialized response length, used for size accounting.
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Entries are visible only while `now < expires_at`.
    pub fn is_live_at(&self, now: UtcDateTime) -> bool {
        now < self.expires_at
    }
}

/// Successful cache read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHit {
    pub data: Value,
    pub status: u16,
    pub cached_at: UtcDateTime,
    pub hit_count: u64,
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateFilter {
    All,
    Uuid(Uuid),
    Exchange(ExchangeId),
    Tag(String),
}

/// Loosely specified invalidation request as received from an outer layer.
///
/// At most one filter is honored, with precedence `all > uuid > exchange > tag`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub exchange: Option<ExchangeId>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl InvalidateRequest {
    pub fn resolve(&self) -> Option<InvalidateFilter> {
        if self.all {
            return Some(InvalidateFilter::All);
        }
        if let Some(uuid) = self.uuid {
            return Some(InvalidateFilter::Uuid(uuid));
        }
        if let Some(exchange) = self.exchange {
            return Some(InvalidateFilter::Exchange(exchange));
        }
        self.tag.clone().map(InvalidateFilter::Tag)
    }
}

impl From<InvalidateFilter> for InvalidateRequest {
    fn from(filter: InvalidateFilter) -> Self {
        match filter {
            InvalidateFilter::All => Self {
                all: true,
                ..Self::default()
            },
            InvalidateFilter::Uuid(uuid) => Self {
                uuid: Some(uuid),
                ..Self::default()
            },
            InvalidateFilter::Exchange(exchange) => Self {
                exchange: Some(exchange),
                ..Self::default()
            },
            InvalidateFilter::Tag(tag) => Self {
                tag: Some(tag),
                ..Self::default()
            },
        }
    }
}

/// Live-entry aggregate for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeCacheStats {
    pub entries: u64,
    /// Sum of `hit_count` over live entries.
    pub hits: u64,
    pub size_bytes: u64,
}

/// Cache statistics. `hits`/`misses` are process-lifetime counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size_bytes: u64,
    pub by_exchange: BTreeMap<ExchangeId, ExchangeCacheStats>,
    pub backend: &'static str,
    pub degraded: bool,
}

/// Storage-layer fault. Logged by [`CacheStore`], never returned from it.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Warehouse(#[from] aggrex_warehouse::WarehouseError),

    #[error("cache payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache worker task failed: {0}")]
    Worker(String),

    #[error("stored cache row is invalid: {0}")]
    InvalidRecord(String),
}

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Storage contract for cache entries. Policy decisions stay in [`CacheStore`].
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insert or replace the entry for `entry.canonical_uuid`.
    fn put<'a>(&'a self, entry: CacheEntry) -> BackendFuture<'a, ()>;

    /// Raw lookup, ignoring expiry.
    fn lookup<'a>(&'a self, uuid: Uuid) -> BackendFuture<'a, Option<CacheEntry>>;

    /// Atomically bump `hit_count` and `last_accessed`; `None` if the entry is gone.
    fn record_hit<'a>(&'a self, uuid: Uuid, now: UtcDateTime) -> BackendFuture<'a, Option<u64>>;

    /// Trim `exchange` back to `max_size` entries.
    fn evict<'a>(
        &'a self,
        exchange: ExchangeId,
        max_size: usize,
        strategy: EvictionStrategy,
    ) -> BackendFuture<'a, usize>;

    fn remove<'a>(&'a self, filter: InvalidateFilter) -> BackendFuture<'a, usize>;

    /// Delete entries with `expires_at <= now`.
    fn remove_expired<'a>(&'a self, now: UtcDateTime) -> BackendFuture<'a, usize>;

    /// Per-exchange aggregates over entries live at `now`.
    fn usage<'a>(
        &'a self,
        now: UtcDateTime,
    ) -> BackendFuture<'a, BTreeMap<ExchangeId, ExchangeCacheStats>>;
}

struct CacheInner {
    primary: Arc<dyn CacheBackend>,
    fallback: MemoryBackend,
    degraded: AtomicBool,
    policies: BTreeMap<ExchangeId, CachePolicy>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Thread-safe response cache shared by every fetch flow.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, policies: BTreeMap<ExchangeId, CachePolicy>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                primary: backend,
                fallback: MemoryBackend::default(),
                degraded: AtomicBool::new(false),
                policies,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Ephemeral in-process store.
    pub fn in_memory(policies: BTreeMap<ExchangeId, CachePolicy>) -> Self {
        Self::new(Arc::new(MemoryBackend::default()), policies)
    }

    /// Build the store selected by `config`. A durable store that cannot be
    /// opened degrades to memory instead of failing startup.
    pub fn from_config(config: &AggregatorConfig) -> Self {
        let policies = config.cache_policies();
        match config.resolved_cache_backend() {
            ResolvedCacheBackend::Memory => {
                info!("using in-memory response cache");
                Self::in_memory(policies)
            }
            ResolvedCacheBackend::DuckDb(warehouse_config) => {
                let path = warehouse_config.db_path.clone();
                match DuckDbBackend::open(warehouse_config) {
                    Ok(backend) => {
                        info!(path = %path.display(), "using durable response cache");
                        Self::new(Arc::new(backend), policies)
                    }
                    Err(error) => {
                        warn!(path = %path.display(), %error, "durable cache unavailable; using in-memory cache");
                        let store = Self::in_memory(policies);
                        store.inner.degraded.store(true, Ordering::Release);
                        store
                    }
                }
            }
        }
    }

    pub fn policy(&self, exchange: ExchangeId) -> CachePolicy {
        self.inner
            .policies
            .get(&exchange)
            .copied()
            .unwrap_or_default()
    }

    pub fn backend_name(&self) -> &'static str {
        if self.is_degraded() {
            self.inner.fallback.name()
        } else {
            self.inner.primary.name()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    /// Upsert the response for `canonical`, then trim its exchange to `max_size`.
    pub async fn set(
        &self,
        canonical: &CanonicalMarket,
        endpoint: &str,
        method: &str,
        response: Value,
        status: u16,
    ) {
        let policy = self.policy(canonical.exchange);
        let now = UtcDateTime::now();
        let size_bytes = serde_json::to_string(&response)
            .map(|body| body.len() as u64)
            .unwrap_or_default();

        let entry = CacheEntry {
            canonical_uuid: canonical.uuid,
            exchange: canonical.exchange,
            endpoint: endpoint.to_owned(),
            method: method.to_ascii_uppercase(),
            headers_hash: headers_hash(&canonical.api_metadata.headers),
            response,
            status,
            cached_at: now,
            expires_at: now.saturating_add(policy.ttl),
            tags: canonical.tags.clone(),
            hit_count: 0,
            last_accessed: now,
            size_bytes,
        };

        self.run("set", |backend| backend.put(entry.clone())).await;

        let exchange = canonical.exchange;
        let evicted = self
            .run("evict", |backend| {
                backend.evict(exchange, policy.max_size, policy.strategy)
            })
            .await
            .unwrap_or_default();
        if evicted > 0 {
            debug!(%exchange, evicted, max_size = policy.max_size, "evicted cache entries over capacity");
        }
    }

    /// Return the live entry for `uuid` if `method` (and `endpoint`, when
    /// given) match. A hit bumps the entry's hit count and access time.
    pub async fn get(&self, uuid: Uuid, endpoint: Option<&str>, method: &str) -> Option<CacheHit> {
        let now = UtcDateTime::now();
        let entry = self
            .run("get", |backend| backend.lookup(uuid))
            .await
            .flatten()
            .filter(|entry| {
                entry.is_live_at(now)
                    && entry.method.eq_ignore_ascii_case(method)
                    && endpoint.map_or(true, |endpoint| entry.endpoint == endpoint)
            });

        let Some(entry) = entry else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let Some(hit_count) = self
            .run("record_hit", |backend| backend.record_hit(uuid, now))
            .await
            .flatten()
        else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheHit {
            data: entry.response,
            status: entry.status,
            cached_at: entry.cached_at,
            hit_count,
        })
    }

    /// Whether a live entry exists. Does not touch counters or access metadata.
    pub async fn has(&self, uuid: Uuid) -> bool {
        let now = UtcDateTime::now();
        self.run("has", |backend| backend.lookup(uuid))
            .await
            .flatten()
            .is_some_and(|entry| entry.is_live_at(now))
    }

    /// Delete entries matching the highest-precedence filter in `request`.
    pub async fn invalidate(&self, request: &InvalidateRequest) -> usize {
        let Some(filter) = request.resolve() else {
            return 0;
        };

        let removed = self
            .run("invalidate", |backend| backend.remove(filter.clone()))
            .await
            .unwrap_or_default();
        info!(?filter, removed, "invalidated cache entries");
        removed
    }

    /// Physically delete expired entries.
    pub async fn cleanup(&self) -> usize {
        let now = UtcDateTime::now();
        let removed = self
            .run("cleanup", |backend| backend.remove_expired(now))
            .await
            .unwrap_or_default();
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    /// Aggregate statistics, optionally restricted to one exchange.
    pub async fn stats(&self, exchange: Option<ExchangeId>) -> CacheStats {
        let now = UtcDateTime::now();
        let mut by_exchange = self
            .run("stats", |backend| backend.usage(now))
            .await
            .unwrap_or_default();
        if let Some(exchange) = exchange {
            by_exchange.retain(|key, _| *key == exchange);
        }

        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStats {
            total: by_exchange.values().map(|usage| usage.entries).sum(),
            hits,
            misses,
            hit_rate,
            size_bytes: by_exchange.values().map(|usage| usage.size_bytes).sum(),
            by_exchange,
            backend: self.backend_name(),
            degraded: self.is_degraded(),
        }
    }

    /// Run [`CacheStore::cleanup`] every `interval` until the handle is aborted.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.cleanup().await;
            }
        })
    }

    async fn run<T, F>(&self, operation: &'static str, call: F) -> Option<T>
    where
        F: for<'a> Fn(&'a dyn CacheBackend) -> BackendFuture<'a, T>,
    {
        if !self.is_degraded() {
            match call(self.inner.primary.as_ref()).await {
                Ok(value) => return Some(value),
                Err(error) => {
                    if !self.inner.degraded.swap(true, Ordering::AcqRel) {
                        warn!(
                            backend = self.inner.primary.name(),
                            operation,
                            %error,
                            "cache backend failed; degrading to in-memory cache"
                        );
                    }
                }
            }
        }

        match call(&self.inner.fallback).await {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(operation, %error, "in-memory cache operation failed");
                None
            }
        }
    }
}

/// Stable digest of request headers (already key-sorted).
pub fn headers_hash(headers: &BTreeMap<String, String>) -> String {
    let mut canonical = String::new();
    for (name, value) in headers {
        canonical.push_str(&name.to_ascii_lowercase());
        canonical.push('=');
        canonical.push_str(value);
        canonical.push('\n');
    }
    Uuid::new_v5(&HEADERS_NAMESPACE, canonical.as_bytes())
        .simple()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{canonicalize, MarketQuery, MarketType};
    use serde_json::json;

    fn policies(ttl: Duration, max_size: usize) -> BTreeMap<ExchangeId, CachePolicy> {
        ExchangeId::ALL
            .into_iter()
            .map(|exchange| {
                (
                    exchange,
                    CachePolicy {
                        ttl,
                        max_size,
                        strategy: EvictionStrategy::Lru,
                    },
                )
            })
            .collect()
    }

    fn market(id: &str) -> CanonicalMarket {
        canonicalize(&MarketQuery::new(ExchangeId::Polymarket, id, MarketType::Binary).expect("valid"))
    }

    /// Backend whose every call fails, to exercise degradation.
    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn put<'a>(&'a self, _entry: CacheEntry) -> BackendFuture<'a, ()> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }

        fn lookup<'a>(&'a self, _uuid: Uuid) -> BackendFuture<'a, Option<CacheEntry>> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }

        fn record_hit<'a>(&'a self, _uuid: Uuid, _now: UtcDateTime) -> BackendFuture<'a, Option<u64>> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }

        fn evict<'a>(
            &'a self,
            _exchange: ExchangeId,
            _max_size: usize,
            _strategy: EvictionStrategy,
        ) -> BackendFuture<'a, usize> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }

        fn remove<'a>(&'a self, _filter: InvalidateFilter) -> BackendFuture<'a, usize> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }

        fn remove_expired<'a>(&'a self, _now: UtcDateTime) -> BackendFuture<'a, usize> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }

        fn usage<'a>(
            &'a self,
            _now: UtcDateTime,
        ) -> BackendFuture<'a, BTreeMap<ExchangeId, ExchangeCacheStats>> {
            Box::pin(async { Err(CacheError::Worker(String::from("disk gone"))) })
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips_and_counts_hits() {
        let cache = CacheStore::in_memory(policies(Duration::from_secs(60), 10));
        let canonical = market("market-a");
        let endpoint = canonical.api_metadata.endpoint.clone();

        cache
            .set(&canonical, &endpoint, "GET", json!({"price": 0.65}), 200)
            .await;

        let hit = cache
            .get(canonical.uuid, Some(&endpoint), "GET")
            .await
            .expect("cache hit");
        assert_eq!(hit.data, json!({"price": 0.65}));
        assert_eq!(hit.hit_count, 1);

        let again = cache.get(canonical.uuid, None, "get").await.expect("hit");
        assert_eq!(again.hit_count, 2);
    }

    #[tokio::test]
    async fn endpoint_and_method_mismatch_is_a_miss() {
        let cache = CacheStore::in_memory(policies(Duration::from_secs(60), 10));
        let canonical = market("market-a");
        cache
            .set(&canonical, "/markets/market-a", "GET", json!(1), 200)
            .await;

        assert!(cache.get(canonical.uuid, Some("/other"), "GET").await.is_none());
        assert!(cache.get(canonical.uuid, None, "POST").await.is_none());

        let stats = cache.stats(None).await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_before_sweep() {
        let cache = CacheStore::in_memory(policies(Duration::ZERO, 10));
        let canonical = market("market-a");
        cache
            .set(&canonical, "/markets/market-a", "GET", json!(1), 200)
            .await;

        assert!(cache.get(canonical.uuid, None, "GET").await.is_none());
        assert!(!cache.has(canonical.uuid).await);
        assert_eq!(cache.cleanup().await, 1);
        assert_eq!(cache.cleanup().await, 0);
    }

    #[tokio::test]
    async fn lru_eviction_keeps_recently_read_entries() {
        let cache = CacheStore::in_memory(policies(Duration::from_secs(60), 2));
        let a = market("a");
        let b = market("b");
        let c = market("c");

        cache.set(&a, "/markets/a", "GET", json!("a"), 200).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set(&b, "/markets/b", "GET", json!("b"), 200).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(a.uuid, None, "GET").await.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set(&c, "/markets/c", "GET", json!("c"), 200).await;

        assert!(cache.has(a.uuid).await);
        assert!(!cache.has(b.uuid).await);
        assert!(cache.has(c.uuid).await);
    }

    #[tokio::test]
    async fn invalidate_honors_precedence() {
        let cache = CacheStore::in_memory(policies(Duration::from_secs(60), 10));
        let a = market("a");
        let b = market("b");
        cache.set(&a, "/markets/a", "GET", json!("a"), 200).await;
        cache.set(&b, "/markets/b", "GET", json!("b"), 200).await;

        let uuid_over_tag = InvalidateRequest {
            uuid: Some(a.uuid),
            tag: Some(String::from("polymarket")),
            ..InvalidateRequest::default()
        };
        assert_eq!(cache.invalidate(&uuid_over_tag).await, 1);
        assert!(!cache.has(a.uuid).await);
        assert!(cache.has(b.uuid).await);

        assert_eq!(cache.invalidate(&InvalidateRequest::default()).await, 0);
        let all = InvalidateRequest {
            all: true,
            exchange: Some(ExchangeId::Kalshi),
            ..InvalidateRequest::default()
        };
        assert_eq!(cache.invalidate(&all).await, 1);
    }

    #[tokio::test]
    async fn backend_faults_degrade_to_memory() {
        let cache = CacheStore::new(Arc::new(BrokenBackend), policies(Duration::from_secs(60), 10));
        let canonical = market("market-a");

        cache
            .set(&canonical, "/markets/market-a", "GET", json!({"price": 0.5}), 200)
            .await;
        assert!(cache.is_degraded());
        assert_eq!(cache.backend_name(), "memory");

        let hit = cache.get(canonical.uuid, None, "GET").await.expect("served from fallback");
        assert_eq!(hit.data, json!({"price": 0.5}));
        assert!(cache.stats(None).await.degraded);
    }

    #[tokio::test]
    async fn stats_report_per_exchange_usage() {
        let cache = CacheStore::in_memory(policies(Duration::from_secs(60), 10));
        let poly = market("a");
        let bitmex = canonicalize(
            &MarketQuery::new(ExchangeId::Bitmex, "XBTUSD", MarketType::Perpetual).expect("valid"),
        );
        cache.set(&poly, "/markets/a", "GET", json!({"p": 1}), 200).await;
        cache.set(&bitmex, "/x", "GET", json!([1, 2]), 200).await;
        cache.get(poly.uuid, None, "GET").await;

        let stats = cache.stats(None).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.by_exchange[&ExchangeId::Polymarket].hits, 1);
        assert_eq!(stats.size_bytes, 7 + 5);

        let bitmex_only = cache.stats(Some(ExchangeId::Bitmex)).await;
        assert_eq!(bitmex_only.total, 1);
        assert!(!bitmex_only.by_exchange.contains_key(&ExchangeId::Polymarket));
    }

    #[tokio::test]
    async fn background_cleanup_sweeps_expired_entries() {
        let backend = Arc::new(MemoryBackend::default());
        let cache = CacheStore::new(backend.clone(), policies(Duration::ZERO, 10));
        let canonical = market("market-a");
        cache
            .set(&canonical, "/markets/market-a", "GET", json!(1), 200)
            .await;
        assert_eq!(backend.len().await, 1);

        let sweeper = cache.spawn_cleanup(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert_eq!(backend.len().await, 0);
    }

    #[test]
    fn headers_hash_is_order_independent_and_stable() {
        let mut first = BTreeMap::new();
        first.insert(String::from("X-B"), String::from("2"));
        first.insert(String::from("X-A"), String::from("1"));
        let mut second = BTreeMap::new();
        second.insert(String::from("X-A"), String::from("1"));
        second.insert(String::from("X-B"), String::from("2"));

        assert_eq!(headers_hash(&first), headers_hash(&second));
        assert_eq!(headers_hash(&first).len(), 32);
    }
}
