//! `DuckDB` connection pool management.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolInner {
    db_path: PathBuf,
    max_pool_size: usize,
    write_ahead: bool,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// A connection pool over a single `DuckDB` database file.
///
/// DuckDB allows one database instance per file per process, so every pooled
/// connection is cloned from a root connection instead of reopening the file.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open the database file and create a pool around it.
    ///
    /// # Arguments
    /// * `path` - Path to the `DuckDB` database file
    /// * `max_pool_size` - Maximum number of idle connections kept for reuse
    /// * `write_ahead` - Keep writes in the write-ahead log and checkpoint lazily
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(
        path: impl Into<PathBuf>,
        max_pool_size: usize,
        write_ahead: bool,
    ) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root, write_ahead)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_pool_size: max_pool_size.max(1),
                write_ahead,
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Acquire a connection from the pool.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be cloned from the root.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned (indicating a previous panic
    /// while holding the lock).
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let idle = self
            .inner
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .pop();

        let connection = match idle {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .expect("duckdb root connection mutex poisoned");
                root.try_clone()?
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Whether writes are left in the write-ahead log between checkpoints.
    #[must_use]
    pub fn write_ahead(&self) -> bool {
        self.inner.write_ahead
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .pool
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        if idle.len() < self.pool.max_pool_size {
            idle.push(connection);
        }
    }
}

/// Configure the root connection; settings are database-wide and shared by clones.
///
/// # Errors
/// Returns an error if configuration SQL fails to execute.
fn configure_connection(connection: &Connection, write_ahead: bool) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")?;
    if write_ahead {
        connection.execute_batch("SET checkpoint_threshold = '16MB';")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pooled_connections_share_one_database() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::open(temp.path().join("pool.duckdb"), 2, true)
            .expect("open pool");

        {
            let writer = manager.acquire().expect("writer");
            writer
                .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (7);")
                .expect("write");
        }

        let reader = manager.acquire().expect("reader");
        let value: i32 = reader
            .query_row("SELECT id FROM t", [], |row| row.get(0))
            .expect("read back");
        assert_eq!(value, 7);
    }

    #[test]
    fn idle_pool_is_bounded() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::open(temp.path().join("pool.duckdb"), 1, false)
            .expect("open pool");

        let first = manager.acquire().expect("first");
        let second = manager.acquire().expect("second");
        drop(first);
        drop(second);

        let idle = manager.inner.idle.lock().expect("idle lock").len();
        assert_eq!(idle, 1);
    }
}
