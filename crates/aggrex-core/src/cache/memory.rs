use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BackendFuture, CacheBackend, CacheEntry, EvictionStrategy, ExchangeCacheStats,
    InvalidateFilter,
};
use crate::{ExchangeId, UtcDateTime};

/// Process-local cache storage. Never fails.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl MemoryBackend {
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn put<'a>(&'a self, entry: CacheEntry) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .write()
                .await
                .insert(entry.canonical_uuid, entry);
            Ok(())
        })
    }

    fn lookup<'a>(&'a self, uuid: Uuid) -> BackendFuture<'a, Option<CacheEntry>> {
        Box::pin(async move { Ok(self.entries.read().await.get(&uuid).cloned()) })
    }

    fn record_hit<'a>(&'a self, uuid: Uuid, now: UtcDateTime) -> BackendFuture<'a, Option<u64>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            Ok(entries.get_mut(&uuid).map(|entry| {
                entry.hit_count += 1;
                entry.last_accessed = now;
                entry.hit_count
            }))
        })
    }

    fn evict<'a>(
        &'a self,
        exchange: ExchangeId,
        max_size: usize,
        strategy: EvictionStrategy,
    ) -> BackendFuture<'a, usize> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let mut candidates = entries
                .values()
                .filter(|entry| entry.exchange == exchange)
                .map(|entry| {
                    let key = match strategy {
                        EvictionStrategy::Lru => (entry.last_accessed, entry.cached_at),
                        EvictionStrategy::Ttl => (entry.expires_at, entry.last_accessed),
                    };
                    (key, entry.canonical_uuid)
                })
                .collect::<Vec<_>>();

            if candidates.len() <= max_size {
                return Ok(0);
            }

            candidates.sort();
            let excess = candidates.len() - max_size;
            for (_, uuid) in candidates.into_iter().take(excess) {
                entries.remove(&uuid);
            }
            Ok(excess)
        })
    }

    fn remove<'a>(&'a self, filter: InvalidateFilter) -> BackendFuture<'a, usize> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            match filter {
                InvalidateFilter::All => entries.clear(),
                InvalidateFilter::Uuid(uuid) => {
                    entries.remove(&uuid);
                }
                InvalidateFilter::Exchange(exchange) => {
                    entries.retain(|_, entry| entry.exchange != exchange);
                }
                InvalidateFilter::Tag(tag) => {
                    entries.retain(|_, entry| !entry.tags.contains(&tag));
                }
            }
            Ok(before - entries.len())
        })
    }

    fn remove_expired<'a>(&'a self, now: UtcDateTime) -> BackendFuture<'a, usize> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live_at(now));
            Ok(before - entries.len())
        })
    }

    fn usage<'a>(
        &'a self,
        now: UtcDateTime,
    ) -> BackendFuture<'a, BTreeMap<ExchangeId, ExchangeCacheStats>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            let mut usage: BTreeMap<ExchangeId, ExchangeCacheStats> = BTreeMap::new();
            for entry in entries.values().filter(|entry| entry.is_live_at(now)) {
                let stats = usage.entry(entry.exchange).or_default();
                stats.entries += 1;
                stats.hits += entry.hit_count;
                stats.size_bytes += entry.size_bytes;
            }
            Ok(usage)
        })
    }
}
