//! Declarative schema operations.
//!
//! A migration unit is a list of [`SchemaOp`] values. The executor renders
//! each operation for a [`Dialect`] and runs the resulting statements in
//! order. Operations with no counterpart in a dialect render to nothing:
//! SQLite has no extensions and no shared trigger functions, so the
//! `updated_at` trigger carries its own body there.

use authstore_types::ColumnType;
use rusqlite::Connection;

/// Name of the shared PostgreSQL trigger function that stamps `updated_at`.
pub const TIMESTAMP_FUNCTION: &str = "update_updated_at_column";

/// SQLite expression producing the current UTC time with milliseconds, in a
/// format `rusqlite`'s chrono support reads back as `DateTime<Utc>`.
const SQLITE_NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// SQLite expression producing a random version 4 UUID in canonical text form.
const SQLITE_UUID_V4: &str = "lower(hex(randomblob(4))) || '-' || lower(hex(randomblob(2))) \
     || '-4' || substr(lower(hex(randomblob(2))), 2) \
     || '-' || substr('89ab', 1 + (random() & 3), 1) || substr(lower(hex(randomblob(2))), 2) \
     || '-' || lower(hex(randomblob(6)))";

/// SQL dialect a migration is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// The embedded engine the executor runs against.
    Sqlite,
    /// PostgreSQL, for porting units to a networked server.
    Postgres,
}

/// Column default values with a dialect-specific spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    GeneratedUuid,
    CurrentTimestamp,
    Bool(bool),
    Int(i64),
}

/// Referential action applied when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
}

impl OnDelete {
    fn sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
        }
    }
}

/// A foreign-key reference from a column to `table(column)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: OnDelete,
}

/// A column in a `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub references: Option<ForeignKey>,
}

impl ColumnSpec {
    /// A nullable column with no constraints.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn not_null(self) -> Self {
        Self {
            not_null: true,
            ..self
        }
    }

    /// Primary key. Also `NOT NULL`, which SQLite does not imply for
    /// non-integer keys.
    pub fn primary_key(self) -> Self {
        Self {
            primary_key: true,
            not_null: true,
            ..self
        }
    }

    pub fn unique(self) -> Self {
        Self {
            unique: true,
            ..self
        }
    }

    pub fn default(self, value: DefaultValue) -> Self {
        Self {
            default: Some(value),
            ..self
        }
    }

    pub fn references(self, table: &str, column: &str, on_delete: OnDelete) -> Self {
        Self {
            references: Some(ForeignKey {
                table: table.to_string(),
                column: column.to_string(),
                on_delete,
            }),
            ..self
        }
    }
}

/// A `CREATE TABLE` description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// A `CREATE INDEX` description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(self) -> Self {
        Self {
            unique: true,
            ..self
        }
    }
}

/// One schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOp {
    /// Enables a database extension (PostgreSQL only).
    CreateExtension(String),
    /// Creates the shared `updated_at` trigger function (PostgreSQL only).
    CreateTimestampFunction,
    CreateTable(TableSpec),
    CreateIndex(IndexSpec),
    /// Keeps `table.updated_at` current on every row update.
    CreateUpdatedAtTrigger { table: String },
    DropUpdatedAtTrigger { table: String },
    DropIndex { name: String },
    /// Drops a table if it exists, along with its indexes and triggers.
    DropTable { name: String },
    /// Drops the shared trigger function and every trigger using it.
    DropTimestampFunction,
    /// A statement passed through verbatim for every dialect.
    Raw(String),
}

impl SchemaOp {
    /// Renders this operation as zero or more SQL statements.
    pub fn render(&self, dialect: Dialect) -> Vec<String> {
        match self {
            Self::CreateExtension(name) => match dialect {
                Dialect::Postgres => vec![format!("CREATE EXTENSION IF NOT EXISTS \"{name}\"")],
                Dialect::Sqlite => Vec::new(),
            },
            Self::CreateTimestampFunction => match dialect {
                Dialect::Postgres => vec![format!(
                    "CREATE OR REPLACE FUNCTION {TIMESTAMP_FUNCTION}()\n\
                     RETURNS TRIGGER AS $$\n\
                     BEGIN\n    \
                         NEW.updated_at = CURRENT_TIMESTAMP;\n    \
                         RETURN NEW;\n\
                     END;\n\
                     $$ LANGUAGE plpgsql"
                )],
                Dialect::Sqlite => Vec::new(),
            },
            Self::CreateTable(table) => vec![create_table_sql(table, dialect)],
            Self::CreateIndex(index) => vec![format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                index.name,
                index.table,
                index.columns.join(", ")
            )],
            Self::CreateUpdatedAtTrigger { table } => {
                let trigger = trigger_name(table);
                match dialect {
                    Dialect::Postgres => vec![format!(
                        "CREATE TRIGGER {trigger}\n\
                         BEFORE UPDATE ON {table}\n\
                         FOR EACH ROW\n\
                         EXECUTE FUNCTION {TIMESTAMP_FUNCTION}()"
                    )],
                    // Recursive triggers are off by default, so the inner
                    // UPDATE does not fire the trigger again.
                    Dialect::Sqlite => vec![format!(
                        "CREATE TRIGGER {trigger}\n\
                         AFTER UPDATE ON {table}\n\
                         FOR EACH ROW\n\
                         BEGIN\n    \
                             UPDATE {table} SET updated_at = {SQLITE_NOW} WHERE id = NEW.id;\n\
                         END"
                    )],
                }
            }
            Self::DropUpdatedAtTrigger { table } => {
                let trigger = trigger_name(table);
                match dialect {
                    Dialect::Postgres => vec![format!("DROP TRIGGER IF EXISTS {trigger} ON {table}")],
                    Dialect::Sqlite => vec![format!("DROP TRIGGER IF EXISTS {trigger}")],
                }
            }
            Self::DropIndex { name } => vec![format!("DROP INDEX IF EXISTS {name}")],
            Self::DropTable { name } => vec![format!("DROP TABLE IF EXISTS {name}")],
            Self::DropTimestampFunction => match dialect {
                Dialect::Postgres => {
                    vec![format!("DROP FUNCTION IF EXISTS {TIMESTAMP_FUNCTION} CASCADE")]
                }
                Dialect::Sqlite => Vec::new(),
            },
            Self::Raw(sql) => vec![sql.clone()],
        }
    }
}

/// Renders every operation in order.
pub fn render_all(ops: &[SchemaOp], dialect: Dialect) -> Vec<String> {
    ops.iter().flat_map(|op| op.render(dialect)).collect()
}

/// Runs `ops` against an embedded connection, statement by statement.
///
/// The caller owns transaction boundaries.
///
/// # Errors
///
/// Returns the driver error of the first statement that fails.
pub fn execute(conn: &Connection, ops: &[SchemaOp]) -> rusqlite::Result<()> {
    for statement in render_all(ops, Dialect::Sqlite) {
        tracing::trace!(%statement, "executing schema statement");
        conn.execute_batch(&statement)?;
    }
    Ok(())
}

fn trigger_name(table: &str) -> String {
    format!("update_{table}_updated_at")
}

fn create_table_sql(table: &TableSpec, dialect: Dialect) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("    {}", column_sql(c, dialect)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n)", table.name, columns)
}

fn column_sql(column: &ColumnSpec, dialect: Dialect) -> String {
    let mut sql = format!("{} {}", column.name, type_sql(column.ty, dialect));
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_sql(default, dialect));
    }
    if let Some(fk) = &column.references {
        sql.push_str(&format!(
            " REFERENCES {} ({}) ON DELETE {}",
            fk.table,
            fk.column,
            fk.on_delete.sql()
        ));
    }
    sql
}

fn type_sql(ty: ColumnType, dialect: Dialect) -> String {
    match (ty, dialect) {
        (ColumnType::Uuid, Dialect::Postgres) => "UUID".to_string(),
        (ColumnType::Uuid, Dialect::Sqlite) => "TEXT".to_string(),
        (ColumnType::Text, _) => "TEXT".to_string(),
        (ColumnType::VarChar(len), _) => format!("VARCHAR({len})"),
        (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
        (ColumnType::Integer, _) => "INTEGER".to_string(),
        (ColumnType::Timestamp, Dialect::Postgres) => "TIMESTAMPTZ".to_string(),
        // TEXT affinity keeps SQLite from coercing timestamp strings.
        (ColumnType::Timestamp, Dialect::Sqlite) => "TEXT".to_string(),
    }
}

fn default_sql(value: DefaultValue, dialect: Dialect) -> String {
    match (value, dialect) {
        (DefaultValue::GeneratedUuid, Dialect::Postgres) => "uuid_generate_v4()".to_string(),
        (DefaultValue::GeneratedUuid, Dialect::Sqlite) => format!("({SQLITE_UUID_V4})"),
        (DefaultValue::CurrentTimestamp, Dialect::Postgres) => "CURRENT_TIMESTAMP".to_string(),
        (DefaultValue::CurrentTimestamp, Dialect::Sqlite) => format!("({SQLITE_NOW})"),
        (DefaultValue::Bool(b), Dialect::Postgres) => String::from(if b { "TRUE" } else { "FALSE" }),
        (DefaultValue::Bool(b), Dialect::Sqlite) => String::from(if b { "1" } else { "0" }),
        (DefaultValue::Int(n), _) => n.to_string(),
    }
}
