//! Scaffolding for new migration units.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while scaffolding a unit.
#[derive(Debug, Error)]
pub enum ScaffoldError {
    /// No name was given.
    #[error("migration name must not be empty")]
    MissingName,

    /// The name cannot form a module identifier.
    #[error("invalid migration name '{0}': use letters, digits, '_', '-' or spaces")]
    InvalidName(String),

    /// The migrations directory does not exist.
    #[error("migrations directory '{}' does not exist", .0.display())]
    MissingDirectory(PathBuf),

    /// A unit file with this name already exists.
    #[error("migration file '{}' already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// Writing the file failed.
    #[error("failed to write migration file: {0}")]
    Io(#[from] io::Error),
}

/// A freshly written unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffolded {
    /// Unit (and module) name, e.g. `m20260101_120000_add_sessions`.
    pub name: String,
    /// Path of the written file.
    pub path: PathBuf,
}

/// Normalizes a user-supplied name to lowercase snake_case.
///
/// # Errors
///
/// Returns `ScaffoldError::MissingName` for blank input and
/// `ScaffoldError::InvalidName` for characters outside ASCII letters,
/// digits, `_`, `-` and spaces.
pub fn normalize_name(raw: &str) -> Result<String, ScaffoldError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScaffoldError::MissingName);
    }

    let mut name = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            'a'..='z' | '0'..='9' | '_' => name.push(c),
            'A'..='Z' => name.push(c.to_ascii_lowercase()),
            '-' | ' ' => name.push('_'),
            _ => return Err(ScaffoldError::InvalidName(raw.to_string())),
        }
    }
    Ok(name)
}

/// Writes a new unit file with empty `up`/`down` stubs into `dir`.
///
/// The unit is named `m<YYYYMMDD_HHMMSS>_<name>` from `now`. Nothing is
/// written to the database, and an existing file is never overwritten.
///
/// # Errors
///
/// Returns `ScaffoldError` if the name is invalid, `dir` is missing, the
/// file already exists, or the write fails.
pub fn create_migration(
    dir: &Path,
    raw_name: &str,
    now: DateTime<Utc>,
) -> Result<Scaffolded, ScaffoldError> {
    let suffix = normalize_name(raw_name)?;
    if !dir.is_dir() {
        return Err(ScaffoldError::MissingDirectory(dir.to_path_buf()));
    }

    let name = format!("m{}_{}", now.format("%Y%m%d_%H%M%S"), suffix);
    let path = dir.join(format!("{name}.rs"));

    let contents = template(&name);
    write_new_file(&path, |file| file.write_all(contents.as_bytes()))?;

    tracing::info!(migration = %name, path = %path.display(), "created migration");
    Ok(Scaffolded { name, path })
}

/// Creates `path` and fills it with `write`. A file left incomplete by a
/// failed write is removed.
fn write_new_file<F>(path: &Path, write: F) -> Result<(), ScaffoldError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(ScaffoldError::AlreadyExists(path.to_path_buf()))
        }
        Err(e) => return Err(ScaffoldError::Io(e)),
    };

    if let Err(e) = write(&mut file).and_then(|()| file.sync_all()) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            tracing::warn!(
                path = %path.display(),
                error = %cleanup,
                "failed to remove partial migration file"
            );
        }
        return Err(ScaffoldError::Io(e));
    }
    Ok(())
}

fn template(name: &str) -> String {
    format!(
        r#"use super::MigrationUnit;
use crate::ops::SchemaOp;

pub struct Migration;

impl MigrationUnit for Migration {{
    fn name(&self) -> &str {{
        "{name}"
    }}

    fn up(&self) -> Vec<SchemaOp> {{
        // Write your migration here
        Vec::new()
    }}

    fn down(&self) -> Vec<SchemaOp> {{
        // Write your rollback here
        Vec::new()
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_name("Add Sessions").expect("valid"), "add_sessions");
        assert_eq!(normalize_name("drop-legacy_2").expect("valid"), "drop_legacy_2");
        assert!(matches!(normalize_name("   "), Err(ScaffoldError::MissingName)));
        assert!(matches!(
            normalize_name("../escape"),
            Err(ScaffoldError::InvalidName(_))
        ));
    }

    #[test]
    fn writes_timestamped_template() {
        let dir = tempfile::tempdir().expect("should create temp dir");

        let scaffolded =
            create_migration(dir.path(), "add sessions", fixed_now()).expect("should scaffold");

        assert_eq!(scaffolded.name, "m20260102_030405_add_sessions");
        assert_eq!(
            scaffolded.path,
            dir.path().join("m20260102_030405_add_sessions.rs")
        );

        let contents = std::fs::read_to_string(&scaffolded.path).expect("should read file");
        assert!(contents.contains("\"m20260102_030405_add_sessions\""));
        assert!(contents.contains("fn up(&self) -> Vec<SchemaOp>"));
        assert!(contents.contains("fn down(&self) -> Vec<SchemaOp>"));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        create_migration(dir.path(), "twice", fixed_now()).expect("first scaffold");

        let err = create_migration(dir.path(), "twice", fixed_now())
            .expect_err("second scaffold at the same second should fail");
        assert!(matches!(err, ScaffoldError::AlreadyExists(_)));
    }

    #[test]
    fn empty_name_writes_nothing() {
        let dir = tempfile::tempdir().expect("should create temp dir");

        let err = create_migration(dir.path(), "", fixed_now()).expect_err("name is required");
        assert!(matches!(err, ScaffoldError::MissingName));

        let entries = std::fs::read_dir(dir.path()).expect("should list dir").count();
        assert_eq!(entries, 0);
    }

    #[test]
    fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("m20260102_030405_partial.rs");

        let err = write_new_file(&path, |file| {
            file.write_all(b"use super::Migra")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        })
        .expect_err("write should fail");

        assert!(matches!(err, ScaffoldError::Io(e) if e.kind() == io::ErrorKind::Other));
        assert!(!path.exists(), "partial file should be removed");
        assert_eq!(std::fs::read_dir(dir.path()).expect("should list dir").count(), 0);
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let missing = dir.path().join("nope");

        let err = create_migration(&missing, "x", fixed_now()).expect_err("dir must exist");
        assert!(matches!(err, ScaffoldError::MissingDirectory(p) if p == missing));
    }
}
