//! Migration runner.
//!
//! Units are Rust modules under `migrations/`, each returning its `up` and
//! `down` changes as [`SchemaOp`] lists. Applied units are tracked by name in
//! the `_authstore_migrations` table. Each unit runs in its own `IMMEDIATE`
//! transaction that re-reads the tracking table first, so runners racing on
//! the same database serialize on the write lock and never apply a unit
//! twice.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::ops::{self, SchemaOp};

mod m20251008_110754_initial_schema;

/// Name of the bookkeeping table.
pub const TRACKING_TABLE: &str = "_authstore_migrations";

/// A named, reversible schema change.
pub trait MigrationUnit: Send + Sync {
    /// Unique name. Units run in ascending name order, so names start with
    /// a sortable timestamp.
    fn name(&self) -> &str;

    /// Forward changes.
    fn up(&self) -> Vec<SchemaOp>;

    /// Changes that undo [`MigrationUnit::up`].
    fn down(&self) -> Vec<SchemaOp>;
}

/// All bundled units. New units are appended here.
pub fn bundled() -> Vec<Box<dyn MigrationUnit>> {
    vec![Box::new(m20251008_110754_initial_schema::Migration)]
}

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying driver error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// The tracking table records a unit this build does not know about.
    #[error("applied migration '{name}' has no matching unit")]
    MissingUnit {
        /// The recorded name.
        name: String,
    },

    /// A pending unit sorts before one that is already applied.
    #[error("pending migration '{name}' sorts before applied migration '{last_applied}'")]
    OutOfOrder {
        /// The pending unit.
        name: String,
        /// The latest applied unit.
        last_applied: String,
    },

    /// Two units share a name.
    #[error("duplicate migration name '{0}'")]
    DuplicateUnit(String),
}

/// Which half of a unit ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The unit was applied.
    Up,
    /// The unit was reverted.
    Down,
}

/// What happened to a unit during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The unit committed.
    Success,
    /// The unit failed and its transaction was rolled back.
    Error,
    /// Skipped because an earlier unit failed.
    NotExecuted,
}

/// Per-unit entry of a [`MigrationRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitResult {
    /// Unit name.
    pub name: String,
    /// Whether the unit was being applied or reverted.
    pub direction: Direction,
    /// What happened to it.
    pub outcome: Outcome,
}

/// Result of an apply or undo run.
///
/// Units that succeeded before a failure stay committed, so a run carries
/// both the per-unit results and the error that stopped it.
#[derive(Debug)]
pub struct MigrationRun {
    /// One entry per unit touched, in execution order.
    pub results: Vec<UnitResult>,
    /// The error that stopped the run, if any.
    pub error: Option<MigrationError>,
}

impl MigrationRun {
    fn failed(error: MigrationError) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error),
        }
    }

    /// Number of units that ran successfully.
    pub fn executed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .count()
    }

    /// Whether the run finished without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Collapses the run into the number of executed units or its error.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the run.
    pub fn into_result(self) -> Result<usize, MigrationError> {
        let executed = self.executed();
        match self.error {
            Some(err) => Err(err),
            None => Ok(executed),
        }
    }
}

/// Applied state of one known unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Unit name.
    pub name: String,
    /// When the unit was applied, or `None` while pending.
    pub applied_at: Option<DateTime<Utc>>,
}

impl UnitStatus {
    /// Whether the unit is recorded in the tracking table.
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

#[derive(Debug)]
struct AppliedMigration {
    name: String,
    applied_at: DateTime<Utc>,
}

/// Runs an ordered set of units against a connection.
pub struct Migrator {
    units: Vec<Box<dyn MigrationUnit>>,
}

impl Migrator {
    /// Sorts `units` by name.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateUnit` if two units share a name.
    pub fn new(mut units: Vec<Box<dyn MigrationUnit>>) -> Result<Self, MigrationError> {
        units.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(pair) = units.windows(2).find(|w| w[0].name() == w[1].name()) {
            return Err(MigrationError::DuplicateUnit(pair[0].name().to_string()));
        }
        Ok(Self { units })
    }

    /// A migrator over the [`bundled`] units.
    ///
    /// # Errors
    ///
    /// See [`Migrator::new`].
    pub fn bundled() -> Result<Self, MigrationError> {
        Self::new(bundled())
    }

    /// Unit names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.name())
    }

    /// Applies every pending unit in order, stopping at the first failure.
    pub fn migrate_to_latest(&self, conn: &mut Connection) -> MigrationRun {
        if let Err(e) = ensure_tracking_table(conn) {
            return MigrationRun::failed(e);
        }

        let mut results = Vec::new();
        loop {
            match self.apply_next(conn) {
                Ok(Some(index)) => results.push(UnitResult {
                    name: self.units[index].name().to_string(),
                    direction: Direction::Up,
                    outcome: Outcome::Success,
                }),
                Ok(None) => {
                    return MigrationRun {
                        results,
                        error: None,
                    }
                }
                Err(err) => {
                    if let MigrationError::ExecutionFailed { name, .. } = &err {
                        tracing::error!(migration = %name, error = %err, "migration failed");
                        let failed_at = self.units.iter().position(|u| u.name() == name);
                        if let Some(index) = failed_at {
                            results.push(UnitResult {
                                name: name.clone(),
                                direction: Direction::Up,
                                outcome: Outcome::Error,
                            });
                            results.extend(self.units[index + 1..].iter().map(|u| {
                                tracing::debug!(migration = u.name(), "skipping migration");
                                UnitResult {
                                    name: u.name().to_string(),
                                    direction: Direction::Up,
                                    outcome: Outcome::NotExecuted,
                                }
                            }));
                        }
                    }
                    return MigrationRun {
                        results,
                        error: Some(err),
                    };
                }
            }
        }
    }

    /// Applies the first pending unit, returning its index, or `None` when
    /// nothing is pending.
    fn apply_next(&self, conn: &mut Connection) -> Result<Option<usize>, MigrationError> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(MigrationError::StateQuery)?;

        let applied = applied_migrations(&tx)?;
        self.check_known(&applied)?;

        let Some(index) = self
            .units
            .iter()
            .position(|u| !applied.iter().any(|a| a.name == u.name()))
        else {
            return Ok(None);
        };
        let unit = &self.units[index];

        if let Some(last) = applied.iter().map(|a| a.name.as_str()).max() {
            if unit.name() < last {
                return Err(MigrationError::OutOfOrder {
                    name: unit.name().to_string(),
                    last_applied: last.to_string(),
                });
            }
        }

        tracing::info!(migration = unit.name(), "applying migration");

        ops::execute(&tx, &unit.up()).map_err(|e| execution_failed(unit.name(), e))?;

        tx.execute(
            "INSERT INTO _authstore_migrations (name, applied_at) VALUES (?1, ?2)",
            params![unit.name(), Utc::now()],
        )
        .map_err(|e| execution_failed(unit.name(), e))?;

        tx.commit().map_err(|e| execution_failed(unit.name(), e))?;

        Ok(Some(index))
    }

    /// Reverts the most recently applied unit. With nothing applied the run
    /// has no results.
    pub fn migrate_down(&self, conn: &mut Connection) -> MigrationRun {
        match self.undo_last(conn) {
            Ok(Some(name)) => MigrationRun {
                results: vec![UnitResult {
                    name,
                    direction: Direction::Down,
                    outcome: Outcome::Success,
                }],
                error: None,
            },
            Ok(None) => MigrationRun {
                results: Vec::new(),
                error: None,
            },
            Err(err) => {
                let mut results = Vec::new();
                if let MigrationError::ExecutionFailed { name, .. } = &err {
                    tracing::error!(migration = %name, error = %err, "rollback failed");
                    results.push(UnitResult {
                        name: name.clone(),
                        direction: Direction::Down,
                        outcome: Outcome::Error,
                    });
                }
                MigrationRun {
                    results,
                    error: Some(err),
                }
            }
        }
    }

    fn undo_last(&self, conn: &mut Connection) -> Result<Option<String>, MigrationError> {
        if !tracking_table_exists(conn)? {
            return Ok(None);
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(MigrationError::StateQuery)?;

        let applied = applied_migrations(&tx)?;
        self.check_known(&applied)?;

        let Some(last) = applied.last() else {
            return Ok(None);
        };
        let unit = self
            .units
            .iter()
            .find(|u| u.name() == last.name)
            .ok_or_else(|| MigrationError::MissingUnit {
                name: last.name.clone(),
            })?;

        tracing::info!(migration = unit.name(), "rolling back migration");

        ops::execute(&tx, &unit.down()).map_err(|e| execution_failed(unit.name(), e))?;

        tx.execute(
            "DELETE FROM _authstore_migrations WHERE name = ?1",
            [unit.name()],
        )
        .map_err(|e| execution_failed(unit.name(), e))?;

        tx.commit().map_err(|e| execution_failed(unit.name(), e))?;

        Ok(Some(unit.name().to_string()))
    }

    /// Lists every known unit in execution order with its applied state.
    /// Does not write to the database.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::StateQuery` if the tracking table cannot be
    /// read.
    pub fn status(&self, conn: &Connection) -> Result<Vec<UnitStatus>, MigrationError> {
        let applied = if tracking_table_exists(conn)? {
            applied_migrations(conn)?
        } else {
            Vec::new()
        };

        Ok(self
            .units
            .iter()
            .map(|u| UnitStatus {
                name: u.name().to_string(),
                applied_at: applied
                    .iter()
                    .find(|a| a.name == u.name())
                    .map(|a| a.applied_at),
            })
            .collect())
    }

    fn check_known(&self, applied: &[AppliedMigration]) -> Result<(), MigrationError> {
        match applied
            .iter()
            .find(|a| !self.units.iter().any(|u| u.name() == a.name))
        {
            Some(unknown) => Err(MigrationError::MissingUnit {
                name: unknown.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Applies all pending bundled units.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried. Units applied before the
/// failure stay committed.
pub fn run_migrations(conn: &mut Connection) -> Result<usize, MigrationError> {
    Migrator::bundled()?.migrate_to_latest(conn).into_result()
}

fn execution_failed(name: &str, source: rusqlite::Error) -> MigrationError {
    MigrationError::ExecutionFailed {
        name: name.to_string(),
        source,
    }
}

fn ensure_tracking_table(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _authstore_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| execution_failed("_authstore_migrations_bootstrap", e))
}

fn tracking_table_exists(conn: &Connection) -> Result<bool, MigrationError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [TRACKING_TABLE],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(MigrationError::StateQuery)
}

/// Applied units in the order they were applied.
fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>, MigrationError> {
    let mut stmt = conn
        .prepare("SELECT name, applied_at FROM _authstore_migrations ORDER BY id")
        .map_err(MigrationError::StateQuery)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                name: row.get(0)?,
                applied_at: row.get(1)?,
            })
        })
        .map_err(MigrationError::StateQuery)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(MigrationError::StateQuery)
}
