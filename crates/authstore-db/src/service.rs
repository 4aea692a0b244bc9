//! Owned database handle with an explicit lifecycle.
//!
//! A [`DatabaseService`] starts uninitialized, becomes usable after
//! [`DatabaseService::init`] has built the pool and answered a smoke query,
//! and releases the pool on [`DatabaseService::close`] or when dropped.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::pool::{create_pool, DbConnection, DbPool, DbRuntimeSettings, PoolError};

/// Errors raised by the connection service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// No connection became available within the pool timeout.
    #[error("failed to check out a database connection: {0}")]
    Checkout(#[source] r2d2::Error),

    /// The connectivity check failed.
    #[error("database connectivity check failed: {0}")]
    SmokeQuery(#[source] rusqlite::Error),

    /// A target setting points somewhere the embedded engine cannot reach.
    #[error(
        "{var}={value} cannot be honored: only the local database file named by DB_NAME is opened"
    )]
    UnsupportedSetting {
        /// The environment variable carrying the setting.
        var: &'static str,
        /// The configured value, redacted for secrets.
        value: String,
    },

    /// A read-only open was requested for a database file that does not
    /// exist.
    #[error("database '{0}' does not exist")]
    MissingDatabase(String),

    /// The handle was requested before `init` or after `close`.
    #[error("database not initialized")]
    NotInitialized,
}

/// Owns the connection pool for the lifetime of the process.
pub struct DatabaseService {
    config: DatabaseConfig,
    read_only: bool,
    pool: Option<DbPool>,
}

impl fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseService")
            .field("config", &self.config)
            .field("read_only", &self.read_only)
            .field("initialized", &self.pool.is_some())
            .finish()
    }
}

impl DatabaseService {
    /// Creates an uninitialized service. No connection is opened.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            read_only: false,
            pool: None,
        }
    }

    /// Creates an uninitialized service that opens an existing database
    /// read-only and never creates it.
    pub fn read_only(config: DatabaseConfig) -> Self {
        Self {
            config,
            read_only: true,
            pool: None,
        }
    }

    /// Creates and initializes a service in one step.
    ///
    /// # Errors
    ///
    /// See [`DatabaseService::init`].
    pub fn connect(config: DatabaseConfig) -> Result<Self, ServiceError> {
        let mut service = Self::new(config);
        service.init()?;
        Ok(service)
    }

    /// Creates and initializes a read-only service in one step.
    ///
    /// # Errors
    ///
    /// See [`DatabaseService::init`].
    pub fn connect_read_only(config: DatabaseConfig) -> Result<Self, ServiceError> {
        let mut service = Self::read_only(config);
        service.init()?;
        Ok(service)
    }

    /// Builds the pool and verifies connectivity with `SELECT 1`.
    ///
    /// Calling `init` on an initialized service is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::UnsupportedSetting` before opening anything if
    /// host, port or credentials name a non-local target, and
    /// `ServiceError::MissingDatabase` for a read-only open of a file that
    /// does not exist. Returns `ServiceError::Pool` if the pool cannot be
    /// built, or `ServiceError::Checkout` / `ServiceError::SmokeQuery` if
    /// the check fails. The service stays uninitialized on error.
    pub fn init(&mut self) -> Result<(), ServiceError> {
        if self.pool.is_some() {
            return Ok(());
        }

        if let Some((var, value)) = self.config.unsupported_setting() {
            tracing::error!(var, value = %value, "unsupported database target setting");
            return Err(ServiceError::UnsupportedSetting { var, value });
        }

        let path = self.config.database_path();
        if self.read_only && path != ":memory:" && !Path::new(&path).exists() {
            return Err(ServiceError::MissingDatabase(path));
        }
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            database = %path,
            user = %self.config.user,
            read_only = self.read_only,
            "connecting to database"
        );

        let settings = DbRuntimeSettings {
            read_only: self.read_only,
            ..self.config.runtime_settings()
        };
        let pool = create_pool(&path, settings)?;
        if let Err(e) = verify(&pool) {
            tracing::error!(error = %e, "database connection failed");
            return Err(e);
        }

        tracing::info!(database = %path, "database connected");
        self.pool = Some(pool);
        Ok(())
    }

    /// Whether `init` has completed and `close` has not been called.
    pub fn is_initialized(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns the live pool.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotInitialized` before `init` or after `close`.
    pub fn pool(&self) -> Result<&DbPool, ServiceError> {
        self.pool.as_ref().ok_or(ServiceError::NotInitialized)
    }

    /// Checks a connection out of the pool, waiting up to the pool timeout.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotInitialized` before `init` or after `close`,
    /// or `ServiceError::Checkout` if no connection frees up in time.
    pub fn connection(&self) -> Result<DbConnection, ServiceError> {
        self.pool()?.get().map_err(ServiceError::Checkout)
    }

    /// Releases the pool. Idempotent.
    pub fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            let state = pool.state();
            let in_use = state.connections.saturating_sub(state.idle_connections);
            if in_use > 0 {
                tracing::warn!(
                    in_use,
                    "closing database pool with connections still checked out"
                );
            }
            drop(pool);
            tracing::info!("database connection closed");
        }
    }
}

impl Drop for DatabaseService {
    fn drop(&mut self) {
        self.close();
    }
}

fn verify(pool: &DbPool) -> Result<(), ServiceError> {
    let conn = pool.get().map_err(ServiceError::Checkout)?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map_err(ServiceError::SmokeQuery)?;
    Ok(())
}
