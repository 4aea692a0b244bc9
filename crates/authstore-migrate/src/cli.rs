//! Command parsing and execution for the `migrate` tool.

use std::path::Path;

use authstore_db::{
    create_migration, DatabaseService, Direction, MigrationError, MigrationRun, Migrator,
    Outcome, ScaffoldError, ServiceError, UnitStatus,
};
use chrono::Utc;
use thiserror::Error;

use crate::config::Config;

/// Usage text printed for unknown or missing commands.
pub const USAGE: &str = "\
Usage:
  migrate up             Run all pending migrations
  migrate down           Roll back the last applied migration
  migrate status         Show applied and pending migrations
  migrate create <name>  Create a new empty migration";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Up,
    Down,
    Status,
    /// The name stays optional here so a missing name is reported as a
    /// usage fault by [`run`] instead of falling through to usage.
    Create { name: Option<String> },
}

impl Command {
    /// Parses the arguments after the program name. Returns `None` for an
    /// unknown or missing command.
    pub fn parse<I>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        match args.next()?.as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "status" => Some(Self::Status),
            "create" => Some(Self::Create { name: args.next() }),
            _ => None,
        }
    }
}

/// Errors that end a command with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// `create` was called without a name.
    #[error("please provide a migration name\n\nUsage: migrate create <name>")]
    MissingName,

    /// The database could not be opened.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A unit failed or the migration state is inconsistent.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The unit file could not be written.
    #[error(transparent)]
    Scaffold(#[from] ScaffoldError),
}

/// Runs `command` against the configured database.
///
/// `create` never opens the database. `status` opens it read-only and
/// reports every unit pending when the database file does not exist.
///
/// # Errors
///
/// Returns `CliError` for usage faults, connectivity faults and failed
/// units. Units applied before a failure stay applied.
pub fn run(command: &Command, config: &Config) -> Result<(), CliError> {
    match command {
        Command::Create { name } => create(name.as_deref(), config),
        Command::Up => {
            println!("Running migrations...\n");
            let service = DatabaseService::connect(config.database.clone())?;
            let mut conn = service.connection()?;
            let run = Migrator::bundled()?.migrate_to_latest(&mut conn);
            print!("{}", format_run(&run));
            finish(run, "All migrations completed successfully")
        }
        Command::Down => {
            println!("Rolling back last migration...\n");
            let service = DatabaseService::connect(config.database.clone())?;
            let mut conn = service.connection()?;
            let run = Migrator::bundled()?.migrate_down(&mut conn);
            if run.results.is_empty() && run.is_success() {
                println!("No applied migrations to roll back");
                return Ok(());
            }
            print!("{}", format_run(&run));
            finish(run, "Rollback completed successfully")
        }
        Command::Status => {
            println!("Checking migration status...\n");
            let migrator = Migrator::bundled()?;
            let status = match DatabaseService::connect_read_only(config.database.clone()) {
                Ok(service) => migrator.status(&*service.connection()?)?,
                Err(ServiceError::MissingDatabase(name)) => {
                    tracing::warn!(database = %name, "database does not exist yet");
                    migrator
                        .names()
                        .map(|name| UnitStatus {
                            name: name.to_string(),
                            applied_at: None,
                        })
                        .collect()
                }
                Err(e) => return Err(e.into()),
            };
            print!("{}", format_status(&status));
            Ok(())
        }
    }
}

fn create(name: Option<&str>, config: &Config) -> Result<(), CliError> {
    let name = name.ok_or(CliError::MissingName)?;
    let scaffolded = create_migration(Path::new(&config.migrations.dir), name, Utc::now())?;

    println!("Created migration: {}", scaffolded.path.display());
    println!(
        "Register it in migrations.rs with `mod {};` and add it to `bundled()`.",
        scaffolded.name
    );
    Ok(())
}

fn finish(run: MigrationRun, done: &str) -> Result<(), CliError> {
    match run.error {
        Some(err) => Err(err.into()),
        None => {
            println!("\n{done}");
            Ok(())
        }
    }
}

/// One line per unit of a run.
pub fn format_run(run: &MigrationRun) -> String {
    if run.results.is_empty() && run.is_success() {
        return "No pending migrations\n".to_string();
    }

    run.results
        .iter()
        .map(|r| {
            let verb = match (r.outcome, r.direction) {
                (Outcome::Success, Direction::Up) => "applied",
                (Outcome::Success, Direction::Down) => "rolled back",
                (Outcome::Error, _) => "FAILED",
                (Outcome::NotExecuted, _) => "skipped",
            };
            format!("{verb:<12} {}\n", r.name)
        })
        .collect()
}

/// One line per known unit: its applied timestamp or `pending`.
pub fn format_status(status: &[UnitStatus]) -> String {
    if status.is_empty() {
        return "No migrations found\n".to_string();
    }

    status
        .iter()
        .map(|s| match s.applied_at {
            Some(at) => format!("applied at {} - {}\n", at.to_rfc3339(), s.name),
            None => format!("pending - {}\n", s.name),
        })
        .collect()
}
