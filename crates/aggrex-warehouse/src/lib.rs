//! # Aggrex Warehouse
//!
//! DuckDB-backed durable storage for cached exchange responses.
//!
//! ## Overview
//!
//! The warehouse persists one row per canonical market UUID in `cache_entries`,
//! with tags in `cache_entry_tags`. It has no notion of expiry policy or hit
//! accounting rules; callers pass the clock (`now_ms`) and limits in, so the
//! same table serves any TTL/size policy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aggrex_warehouse::{CacheRecord, CacheWarehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = CacheWarehouse::open(WarehouseConfig::default())?;
//!     let removed = warehouse.delete_expired(1_700_000_000_000)?;
//!     println!("swept {removed} expired rows");
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `cache_entries` | Cached responses keyed by canonical UUID |
//! | `cache_entry_tags` | Tag index for tag-based invalidation |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection, OptionalExt};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for the durable cache database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
    /// Leave writes in the write-ahead log and checkpoint lazily. When disabled
    /// every write transaction is followed by an explicit checkpoint.
    pub write_ahead: bool,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: resolve_aggrex_home().join("cache").join("responses.duckdb"),
            max_pool_size: 4,
            write_ahead: true,
        }
    }
}

/// Row order used when trimming an exchange back under its size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOrder {
    /// Oldest `last_accessed_ms` first.
    LeastRecentlyAccessed,
    /// Smallest `expires_at_ms` first.
    SoonestExpiring,
}

impl EvictionOrder {
    const fn order_by(self) -> &'static str {
        match self {
            Self::LeastRecentlyAccessed => "last_accessed_ms ASC, cached_at_ms ASC",
            Self::SoonestExpiring => "expires_at_ms ASC, last_accessed_ms ASC",
        }
    }
}

/// A cached response row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub canonical_uuid: String,
    pub exchange: String,
    pub endpoint: String,
    pub method: String,
    pub headers_hash: String,
    /// Serialized response body.
    pub response: String,
    pub status: u16,
    pub cached_at_ms: i64,
    pub expires_at_ms: i64,
    pub hit_count: u64,
    pub last_accessed_ms: i64,
    pub tags: Vec<String>,
}

/// Per-exchange aggregate over live (unexpired) rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeUsage {
    pub exchange: String,
    pub entries: u64,
    pub hits: u64,
    pub size_bytes: u64,
}

/// Durable response cache stored in `DuckDB`.
#[derive(Clone)]
pub struct CacheWarehouse {
    manager: DuckDbConnectionManager,
}

impl CacheWarehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database file and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(
            config.db_path.clone(),
            config.max_pool_size,
            config.write_ahead,
        )?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        debug!(path = %config.db_path.display(), write_ahead = config.write_ahead, "cache warehouse opened");
        Ok(warehouse)
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Insert or replace the row for `record.canonical_uuid`, including its tags.
    pub fn upsert(&self, record: &CacheRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            delete_rows(&connection, std::slice::from_ref(&record.canonical_uuid))?;
            connection.execute(
                "INSERT INTO cache_entries \
                 (canonical_uuid, exchange, endpoint, method, headers_hash, response, status, \
                  cached_at_ms, expires_at_ms, hit_count, last_accessed_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.canonical_uuid,
                    record.exchange,
                    record.endpoint,
                    record.method,
                    record.headers_hash,
                    record.response,
                    i32::from(record.status),
                    record.cached_at_ms,
                    record.expires_at_ms,
                    to_sql_count(record.hit_count),
                    record.last_accessed_ms,
                ],
            )?;
            for tag in &record.tags {
                connection.execute(
                    "INSERT OR IGNORE INTO cache_entry_tags (canonical_uuid, tag) VALUES (?, ?)",
                    params![record.canonical_uuid, tag],
                )?;
            }
            Ok(())
        })();

        self.finalize_write(&connection, result)
    }

    /// Fetch a row regardless of expiry.
    pub fn get(&self, canonical_uuid: &str) -> Result<Option<CacheRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let record = connection
            .query_row(
                "SELECT canonical_uuid, exchange, endpoint, method, headers_hash, response, \
                 status, cached_at_ms, expires_at_ms, hit_count, last_accessed_ms \
                 FROM cache_entries WHERE canonical_uuid = ?",
                params![canonical_uuid],
                |row| {
                    let status: i32 = row.get(6)?;
                    let hit_count: i64 = row.get(9)?;
                    Ok(CacheRecord {
                        canonical_uuid: row.get(0)?,
                        exchange: row.get(1)?,
                        endpoint: row.get(2)?,
                        method: row.get(3)?,
                        headers_hash: row.get(4)?,
                        response: row.get(5)?,
                        status: u16::try_from(status).unwrap_or_default(),
                        cached_at_ms: row.get(7)?,
                        expires_at_ms: row.get(8)?,
                        hit_count: u64::try_from(hit_count).unwrap_or_default(),
                        last_accessed_ms: row.get(10)?,
                        tags: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        let mut statement = connection
            .prepare("SELECT tag FROM cache_entry_tags WHERE canonical_uuid = ? ORDER BY tag")?;
        let tags = statement.query_map(params![canonical_uuid], |row| row.get::<_, String>(0))?;
        for tag in tags {
            record.tags.push(tag?);
        }

        Ok(Some(record))
    }

    /// Increment the hit counter and refresh `last_accessed_ms`. Returns the new
    /// hit count, or `None` when the row no longer exists.
    pub fn record_hit(
        &self,
        canonical_uuid: &str,
        now_ms: i64,
    ) -> Result<Option<u64>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let hits: Option<i64> = connection
            .query_row(
                "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed_ms = ? \
                 WHERE canonical_uuid = ? RETURNING hit_count",
                params![now_ms, canonical_uuid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hits.map(|value| u64::try_from(value).unwrap_or_default()))
    }

    /// Delete the oldest rows (by `order`) for `exchange` until at most
    /// `max_size` remain. Returns the number of rows removed.
    pub fn evict_over_capacity(
        &self,
        exchange: &str,
        max_size: usize,
        order: EvictionOrder,
    ) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE exchange = ?",
            params![exchange],
            |row| row.get(0),
        )?;
        let count = usize::try_from(count).unwrap_or_default();
        if count <= max_size {
            return Ok(0);
        }

        let excess = to_sql_count((count - max_size) as u64);
        let sql = format!(
            "SELECT canonical_uuid FROM cache_entries WHERE exchange = ? ORDER BY {} LIMIT ?",
            order.order_by()
        );
        let victims = select_uuids(&connection, &sql, params![exchange, excess])?;
        self.delete_in_transaction(&connection, &victims)
    }

    /// Delete every row.
    pub fn delete_all(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let victims = select_uuids(&connection, "SELECT canonical_uuid FROM cache_entries", [])?;
        self.delete_in_transaction(&connection, &victims)
    }

    /// Delete a single row by canonical UUID.
    pub fn delete_uuid(&self, canonical_uuid: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let victims = select_uuids(
            &connection,
            "SELECT canonical_uuid FROM cache_entries WHERE canonical_uuid = ?",
            params![canonical_uuid],
        )?;
        self.delete_in_transaction(&connection, &victims)
    }

    /// Delete every row cached for `exchange`.
    pub fn delete_exchange(&self, exchange: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let victims = select_uuids(
            &connection,
            "SELECT canonical_uuid FROM cache_entries WHERE exchange = ?",
            params![exchange],
        )?;
        self.delete_in_transaction(&connection, &victims)
    }

    /// Delete every row carrying `tag`.
    pub fn delete_tag(&self, tag: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let victims = select_uuids(
            &connection,
            "SELECT DISTINCT e.canonical_uuid FROM cache_entries e \
             JOIN cache_entry_tags t ON t.canonical_uuid = e.canonical_uuid \
             WHERE t.tag = ?",
            params![tag],
        )?;
        self.delete_in_transaction(&connection, &victims)
    }

    /// Delete every row with `expires_at_ms <= now_ms`.
    pub fn delete_expired(&self, now_ms: i64) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let victims = select_uuids(
            &connection,
            "SELECT canonical_uuid FROM cache_entries WHERE expires_at_ms <= ?",
            params![now_ms],
        )?;
        self.delete_in_transaction(&connection, &victims)
    }

    /// Aggregate live rows per exchange.
    pub fn usage(&self, now_ms: i64) -> Result<Vec<ExchangeUsage>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT exchange, COUNT(*), \
             CAST(COALESCE(SUM(hit_count), 0) AS BIGINT), \
             CAST(COALESCE(SUM(strlen(response)), 0) AS BIGINT) \
             FROM cache_entries WHERE expires_at_ms > ? \
             GROUP BY exchange ORDER BY exchange",
        )?;
        let rows = statement.query_map(params![now_ms], |row| {
            let entries: i64 = row.get(1)?;
            let hits: i64 = row.get(2)?;
            let size_bytes: i64 = row.get(3)?;
            Ok(ExchangeUsage {
                exchange: row.get(0)?,
                entries: u64::try_from(entries).unwrap_or_default(),
                hits: u64::try_from(hits).unwrap_or_default(),
                size_bytes: u64::try_from(size_bytes).unwrap_or_default(),
            })
        })?;

        let mut usage = Vec::new();
        for row in rows {
            usage.push(row?);
        }
        Ok(usage)
    }

    fn delete_in_transaction(
        &self,
        connection: &Connection,
        victims: &[String],
    ) -> Result<usize, WarehouseError> {
        if victims.is_empty() {
            return Ok(0);
        }

        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = delete_rows(connection, victims);
        self.finalize_write(connection, result)
    }

    fn finalize_write<T>(
        &self,
        connection: &Connection,
        result: Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let value = finalize_transaction(connection, result)?;
        if !self.manager.write_ahead() {
            connection.execute_batch("CHECKPOINT")?;
        }
        Ok(value)
    }
}

fn select_uuids<P: ::duckdb::Params>(
    connection: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<String>, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map(params, |row| row.get::<_, String>(0))?;
    let mut uuids = Vec::new();
    for row in rows {
        uuids.push(row?);
    }
    Ok(uuids)
}

fn delete_rows(connection: &Connection, uuids: &[String]) -> Result<usize, WarehouseError> {
    let mut removed = 0;
    for uuid in uuids {
        connection.execute(
            "DELETE FROM cache_entry_tags WHERE canonical_uuid = ?",
            params![uuid],
        )?;
        removed += connection.execute(
            "DELETE FROM cache_entries WHERE canonical_uuid = ?",
            params![uuid],
        )?;
    }
    Ok(removed)
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Resolve the aggrex data directory: `AGGREX_HOME`, else `$HOME/.aggrex`.
pub fn resolve_aggrex_home() -> PathBuf {
    if let Some(path) = env::var_os("AGGREX_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".aggrex");
    }

    PathBuf::from(".aggrex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(write_ahead: bool) -> (tempfile::TempDir, CacheWarehouse) {
        let temp = tempdir().expect("tempdir");
        let warehouse = CacheWarehouse::open(WarehouseConfig {
            db_path: temp.path().join("cache").join("responses.duckdb"),
            max_pool_size: 2,
            write_ahead,
        })
        .expect("warehouse open");
        (temp, warehouse)
    }

    fn record(uuid: &str, exchange: &str, last_accessed_ms: i64) -> CacheRecord {
        CacheRecord {
            canonical_uuid: uuid.to_string(),
            exchange: exchange.to_string(),
            endpoint: format!("/markets/{uuid}"),
            method: String::from("GET"),
            headers_hash: String::from("0000"),
            response: String::from(r#"{"price":0.65}"#),
            status: 200,
            cached_at_ms: 1_000,
            expires_at_ms: 10_000,
            hit_count: 0,
            last_accessed_ms,
            tags: vec![exchange.to_string(), String::from("binary")],
        }
    }

    #[test]
    fn upsert_then_get_returns_row_with_tags() {
        let (_temp, warehouse) = open_temp(true);
        warehouse.upsert(&record("a", "polymarket", 1_000)).expect("upsert");

        let stored = warehouse.get("a").expect("get").expect("row exists");
        assert_eq!(stored.response, r#"{"price":0.65}"#);
        assert_eq!(stored.tags, vec!["binary".to_string(), "polymarket".to_string()]);
    }

    #[test]
    fn upsert_replaces_previous_row() {
        let (_temp, warehouse) = open_temp(false);
        warehouse.upsert(&record("a", "polymarket", 1_000)).expect("first");
        let mut updated = record("a", "polymarket", 2_000);
        updated.response = String::from(r#"{"price":0.7}"#);
        warehouse.upsert(&updated).expect("second");

        let stored = warehouse.get("a").expect("get").expect("row exists");
        assert_eq!(stored.response, r#"{"price":0.7}"#);
        assert_eq!(stored.last_accessed_ms, 2_000);
    }

    #[test]
    fn record_hit_increments_counter() {
        let (_temp, warehouse) = open_temp(true);
        warehouse.upsert(&record("a", "polymarket", 1_000)).expect("upsert");

        assert_eq!(warehouse.record_hit("a", 5_000).expect("hit"), Some(1));
        assert_eq!(warehouse.record_hit("a", 6_000).expect("hit"), Some(2));
        assert_eq!(warehouse.record_hit("missing", 6_000).expect("hit"), None);

        let stored = warehouse.get("a").expect("get").expect("row exists");
        assert_eq!(stored.last_accessed_ms, 6_000);
    }

    #[test]
    fn eviction_removes_least_recently_accessed_rows() {
        let (_temp, warehouse) = open_temp(true);
        warehouse.upsert(&record("old", "kalshi", 1_000)).expect("upsert");
        warehouse.upsert(&record("mid", "kalshi", 2_000)).expect("upsert");
        warehouse.upsert(&record("new", "kalshi", 3_000)).expect("upsert");
        warehouse.upsert(&record("other", "bitmex", 0)).expect("upsert");

        let removed = warehouse
            .evict_over_capacity("kalshi", 2, EvictionOrder::LeastRecentlyAccessed)
            .expect("evict");

        assert_eq!(removed, 1);
        assert!(warehouse.get("old").expect("get").is_none());
        assert!(warehouse.get("mid").expect("get").is_some());
        assert!(warehouse.get("other").expect("get").is_some());
    }

    #[test]
    fn tag_and_expiry_deletes_are_scoped() {
        let (_temp, warehouse) = open_temp(true);
        let mut expired = record("expired", "sports", 0);
        expired.expires_at_ms = 500;
        expired.tags = vec![String::from("sports"), String::from("nfl")];
        warehouse.upsert(&expired).expect("upsert");
        warehouse.upsert(&record("live", "polymarket", 0)).expect("upsert");

        assert_eq!(warehouse.delete_tag("nfl").expect("tag delete"), 1);
        assert_eq!(warehouse.delete_expired(20_000).expect("sweep"), 1);
        assert_eq!(warehouse.delete_all().expect("clear"), 0);
    }

    #[test]
    fn usage_counts_only_live_rows() {
        let (_temp, warehouse) = open_temp(true);
        warehouse.upsert(&record("a", "polymarket", 0)).expect("upsert");
        let mut stale = record("b", "polymarket", 0);
        stale.expires_at_ms = 100;
        warehouse.upsert(&stale).expect("upsert");
        warehouse.record_hit("a", 10).expect("hit");

        let usage = warehouse.usage(1_000).expect("usage");
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].exchange, "polymarket");
        assert_eq!(usage[0].entries, 1);
        assert_eq!(usage[0].hits, 1);
        assert_eq!(usage[0].size_bytes, 14);
    }
}
