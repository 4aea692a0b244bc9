//! Database layer for the authentication store.
//!
//! Provides SQLite connection pooling (via `r2d2`), a service that owns the
//! pool for the lifetime of the process, a reversible migration runner with
//! persisted state, and typed lookups over the table contract defined in
//! `authstore-types`. Every table is created through versioned migration
//! units managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: an embedded engine needs no external
//!   database process and lets every test run against a throwaway file.
//!   Migration units are engine-neutral [`ops::SchemaOp`] values, so the
//!   same units also render PostgreSQL DDL.
//! - **Units compiled into the binary**: a unit is a Rust module listed in
//!   [`bundled`], so migrations ship with the code that depends on them.
//! - **One transaction per unit**: a failing unit leaves no partial
//!   schema behind and earlier units stay applied.

mod config;
mod migrations;
pub mod ops;
mod pool;
mod records;
mod scaffold;
mod service;

pub use config::{ConfigError, DatabaseConfig};
pub use migrations::{
    bundled, run_migrations, Direction, MigrationError, MigrationRun, MigrationUnit, Migrator,
    Outcome, UnitResult, UnitStatus, TRACKING_TABLE,
};
pub use pool::{create_pool, DbConnection, DbPool, DbRuntimeSettings, PoolError};
pub use records::{find_by, find_by_id, QueryError, Record};
pub use scaffold::{create_migration, normalize_name, ScaffoldError, Scaffolded};
pub use service::{DatabaseService, ServiceError};
