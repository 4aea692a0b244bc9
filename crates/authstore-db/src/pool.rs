//! Connection pool creation and configuration.

use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// Runtime tunables for pooled connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for each connection, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    pub pool_max_size: u32,

    /// How long a checkout may wait for a free connection, in milliseconds.
    pub pool_timeout_ms: u64,

    /// Open an existing database read-only. Never creates the file and
    /// leaves the journal mode untouched.
    pub read_only: bool,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            pool_timeout_ms: 30_000,
            read_only: false,
        }
    }
}

/// A type alias for the connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of a [`DbPool`].
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Creates a new connection pool with WAL mode and foreign keys enabled.
///
/// Foreign keys are off by default in SQLite and must be switched on per
/// connection, otherwise `ON DELETE CASCADE` is silently ignored.
///
/// # Arguments
///
/// * `db_path` - Path to the database file. Use `:memory:` for an in-memory
///   database (each pooled connection then sees its own empty database).
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the initial connections cannot be
/// opened within `pool_timeout_ms`.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = if settings.read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    };

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            // Set first so the WAL switch below waits on a racing opener.
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {};
                 PRAGMA foreign_keys = ON;",
                settings.busy_timeout_ms
            ))?;
            if settings.read_only {
                return Ok(());
            }

            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            Ok(())
        });

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.pool_timeout_ms))
        .build(manager)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_in_memory_pool() {
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
            pool_timeout_ms: 1_000,
            read_only: false,
        };

        let pool = create_pool(":memory:", settings).expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert!(
            mode == "wal" || mode == "memory",
            "unexpected journal_mode: {mode}"
        );

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.max_size(), 3, "pool max size should match settings");
    }

    #[test]
    fn file_pool_uses_wal() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("wal.db");

        let pool = create_pool(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");
    }

    #[test]
    fn unopenable_path_fails_pool_init() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let settings = DbRuntimeSettings {
            pool_timeout_ms: 200,
            ..DbRuntimeSettings::default()
        };

        // A directory cannot be opened as a database file.
        let result = create_pool(dir.path().to_str().expect("utf-8 path"), settings);
        assert!(matches!(result, Err(PoolError::PoolInit(_))));
    }

    #[test]
    fn read_only_pool_rejects_writes() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("ro.db");
        let path = path.to_str().expect("utf-8 path");

        {
            let pool = create_pool(path, DbRuntimeSettings::default())
                .expect("pool creation should succeed");
            let conn = pool.get().expect("should get a connection");
            conn.execute_batch("CREATE TABLE t (id INTEGER);")
                .expect("should create table");
        }

        let settings = DbRuntimeSettings {
            read_only: true,
            ..DbRuntimeSettings::default()
        };
        let pool = create_pool(path, settings).expect("read-only pool should open");
        let conn = pool.get().expect("should get a connection");

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .expect("reads should work");
        assert_eq!(rows, 0);
        assert!(conn.execute("INSERT INTO t VALUES (1)", []).is_err());
    }
}
