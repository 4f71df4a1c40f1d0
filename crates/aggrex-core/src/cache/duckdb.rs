use std::collections::BTreeMap;

use aggrex_warehouse::{CacheRecord, CacheWarehouse, EvictionOrder, WarehouseConfig, WarehouseError};
use uuid::Uuid;

use super::{
    BackendFuture, CacheBackend, CacheEntry, CacheError, EvictionStrategy, ExchangeCacheStats,
    InvalidateFilter,
};
use crate::{ExchangeId, UtcDateTime};

/// Durable cache storage over [`CacheWarehouse`].
///
/// Warehouse calls are synchronous DuckDB work, so each one runs on the
/// blocking pool.
#[derive(Clone)]
pub struct DuckDbBackend {
    warehouse: CacheWarehouse,
}

impl DuckDbBackend {
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        CacheWarehouse::open(config).map(Self::from_warehouse)
    }

    pub fn from_warehouse(warehouse: CacheWarehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &CacheWarehouse {
        &self.warehouse
    }

    fn blocking<'a, T, F>(&'a self, work: F) -> BackendFuture<'a, T>
    where
        T: Send + 'static,
        F: FnOnce(&CacheWarehouse) -> Result<T, CacheError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || work(&warehouse))
                .await
                .map_err(|error| CacheError::Worker(error.to_string()))?
        })
    }
}

impl CacheBackend for DuckDbBackend {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn put<'a>(&'a self, entry: CacheEntry) -> BackendFuture<'a, ()> {
        self.blocking(move |warehouse| {
            let record = to_record(&entry)?;
            warehouse.upsert(&record)?;
            Ok(())
        })
    }

    fn lookup<'a>(&'a self, uuid: Uuid) -> BackendFuture<'a, Option<CacheEntry>> {
        self.blocking(move |warehouse| {
            warehouse
                .get(&uuid.to_string())?
                .map(from_record)
                .transpose()
        })
    }

    fn record_hit<'a>(&'a self, uuid: Uuid, now: UtcDateTime) -> BackendFuture<'a, Option<u64>> {
        self.blocking(move |warehouse| {
            Ok(warehouse.record_hit(&uuid.to_string(), now.unix_millis())?)
        })
    }

    fn evict<'a>(
        &'a self,
        exchange: ExchangeId,
        max_size: usize,
        strategy: EvictionStrategy,
    ) -> BackendFuture<'a, usize> {
        let order = match strategy {
            EvictionStrategy::Lru => EvictionOrder::LeastRecentlyAccessed,
            EvictionStrategy::Ttl => EvictionOrder::SoonestExpiring,
        };
        self.blocking(move |warehouse| {
            Ok(warehouse.evict_over_capacity(exchange.as_str(), max_size, order)?)
        })
    }

    fn remove<'a>(&'a self, filter: InvalidateFilter) -> BackendFuture<'a, usize> {
        self.blocking(move |warehouse| {
            let removed = match &filter {
                InvalidateFilter::All => warehouse.delete_all()?,
                InvalidateFilter::Uuid(uuid) => warehouse.delete_uuid(&uuid.to_string())?,
                InvalidateFilter::Exchange(exchange) => {
                    warehouse.delete_exchange(exchange.as_str())?
                }
                InvalidateFilter::Tag(tag) => warehouse.delete_tag(tag)?,
            };
            Ok(removed)
        })
    }

    fn remove_expired<'a>(&'a self, now: UtcDateTime) -> BackendFuture<'a, usize> {
        self.blocking(move |warehouse| Ok(warehouse.delete_expired(now.unix_millis())?))
    }

    fn usage<'a>(
        &'a self,
        now: UtcDateTime,
    ) -> BackendFuture<'a, BTreeMap<ExchangeId, ExchangeCacheStats>> {
        self.blocking(move |warehouse| {
            let mut usage = BTreeMap::new();
            for row in warehouse.usage(now.unix_millis())? {
                let exchange = row
                    .exchange
                    .parse::<ExchangeId>()
                    .map_err(|error| CacheError::InvalidRecord(error.to_string()))?;
                usage.insert(
                    exchange,
                    ExchangeCacheStats {
                        entries: row.entries,
                        hits: row.hits,
                        size_bytes: row.size_bytes,
                    },
                );
            }
            Ok(usage)
        })
    }
}

fn to_record(entry: &CacheEntry) -> Result<CacheRecord, CacheError> {
    Ok(CacheRecord {
        canonical_uuid: entry.canonical_uuid.to_string(),
        exchange: entry.exchange.as_str().to_owned(),
        endpoint: entry.endpoint.clone(),
        method: entry.method.clone(),
        headers_hash: entry.headers_hash.clone(),
        response: serde_json::to_string(&entry.response)?,
        status: entry.status,
        cached_at_ms: entry.cached_at.unix_millis(),
        expires_at_ms: entry.expires_at.unix_millis(),
        hit_count: entry.hit_count,
        last_accessed_ms: entry.last_accessed.unix_millis(),
        tags: entry.tags.iter().cloned().collect(),
    })
}

fn from_record(record: CacheRecord) -> Result<CacheEntry, CacheError> {
    let invalid = |error: &dyn std::fmt::Display| CacheError::InvalidRecord(error.to_string());

    let canonical_uuid = Uuid::parse_str(&record.canonical_uuid).map_err(|e| invalid(&e))?;
    let exchange = record.exchange.parse::<ExchangeId>().map_err(|e| invalid(&e))?;
    Ok(CacheEntry {
        canonical_uuid,
        exchange,
        endpoint: record.endpoint,
        method: record.method,
        headers_hash: record.headers_hash,
        size_bytes: record.response.len() as u64,
        response: serde_json::from_str(&record.response)?,
        status: record.status,
        cached_at: UtcDateTime::from_unix_millis(record.cached_at_ms),
        expires_at: UtcDateTime::from_unix_millis(record.expires_at_ms),
        tags: record.tags.into_iter().collect(),
        hit_count: record.hit_count,
        last_accessed: UtcDateTime::from_unix_millis(record.last_accessed_ms),
    })
}
