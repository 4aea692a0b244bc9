//! Static table contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ColumnType::{Boolean, Integer, Text, Timestamp, Uuid, VarChar};

/// Semantic column type, independent of any SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// A UUID identifier.
    Uuid,
    /// Unbounded text.
    Text,
    /// Text bounded to the given number of characters.
    VarChar(u16),
    /// A boolean flag.
    Boolean,
    /// A 32-bit signed integer.
    Integer,
    /// A timezone-aware timestamp.
    Timestamp,
}

/// A column in the table contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Semantic type.
    pub ty: ColumnType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the database supplies the value when an insert omits it.
    pub generated: bool,
}

impl ColumnDef {
    /// A required column with no database default.
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            generated: false,
        }
    }

    /// Marks the column as accepting NULL.
    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    /// Marks the column as filled in by the database when omitted.
    pub const fn generated(self) -> Self {
        Self {
            generated: true,
            ..self
        }
    }
}

/// A table in the contract: its name and ordered column set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Table name as it exists in the database.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnDef],
}

/// Errors raised when a query references something outside the contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The table is not part of the contract.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The column does not exist on the table.
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn {
        /// Table the lookup was made against.
        table: &'static str,
        /// The offending column name.
        column: String,
    },
}

impl TableDef {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns every column name joined for use in a `SELECT` list.
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Checks that every name in `columns` belongs to this table.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownColumn` for the first name that is not
    /// part of the table.
    pub fn validate_columns(&self, columns: &[&str]) -> Result<(), SchemaError> {
        match columns.iter().find(|name| self.column(name).is_none()) {
            Some(unknown) => Err(SchemaError::UnknownColumn {
                table: self.name,
                column: (*unknown).to_string(),
            }),
            None => Ok(()),
        }
    }
}

const fn id() -> ColumnDef {
    ColumnDef::new("id", Uuid).generated()
}

const fn person_id() -> ColumnDef {
    ColumnDef::new("person_id", Uuid)
}

const fn created_at() -> ColumnDef {
    ColumnDef::new("created_at", Timestamp).generated()
}

/// Account records. Soft-deleted through `deleted_at`.
pub const PERSON: TableDef = TableDef {
    name: "person",
    columns: &[
        id(),
        ColumnDef::new("email", VarChar(255)),
        ColumnDef::new("password_hash", VarChar(255)),
        ColumnDef::new("first_name", VarChar(100)).nullable(),
        ColumnDef::new("last_name", VarChar(100)).nullable(),
        ColumnDef::new("avatar_url", Text).nullable(),
        ColumnDef::new("email_verified", Boolean).generated(),
        ColumnDef::new("email_verified_at", Timestamp).nullable(),
        ColumnDef::new("is_active", Boolean).generated(),
        ColumnDef::new("is_2fa_enabled", Boolean).generated(),
        ColumnDef::new("two_fa_secret", VarChar(255)).nullable(),
        ColumnDef::new("failed_login_attempts", Integer).generated(),
        ColumnDef::new("locked_until", Timestamp).nullable(),
        ColumnDef::new("last_login_at", Timestamp).nullable(),
        created_at(),
        ColumnDef::new("updated_at", Timestamp).nullable().generated(),
        ColumnDef::new("deleted_at", Timestamp).nullable(),
    ],
};

/// Long-lived session tokens, stored hashed.
pub const REFRESH_TOKEN: TableDef = TableDef {
    name: "refresh_token",
    columns: &[
        id(),
        person_id(),
        ColumnDef::new("token_hash", VarChar(255)),
        ColumnDef::new("expires_at", Timestamp),
        ColumnDef::new("device_name", VarChar(255)).nullable(),
        ColumnDef::new("device_type", VarChar(50)).nullable(),
        ColumnDef::new("ip_address", VarChar(45)).nullable(),
        ColumnDef::new("user_agent", Text).nullable(),
        ColumnDef::new("is_revoked", Boolean).generated(),
        ColumnDef::new("revoked_at", Timestamp).nullable(),
        ColumnDef::new("last_used_at", Timestamp).nullable(),
        created_at(),
    ],
};

pub const PASSWORD_RESET_TOKEN: TableDef = TableDef {
    name: "password_reset_token",
    columns: &[
        id(),
        person_id(),
        ColumnDef::new("token_hash", VarChar(255)),
        ColumnDef::new("expires_at", Timestamp),
        ColumnDef::new("used", Boolean).generated(),
        ColumnDef::new("used_at", Timestamp).nullable(),
        created_at(),
    ],
};

pub const EMAIL_VERIFICATION_TOKEN: TableDef = TableDef {
    name: "email_verification_token",
    columns: &[
        id(),
        person_id(),
        ColumnDef::new("token_hash", VarChar(255)),
        ColumnDef::new("expires_at", Timestamp),
        ColumnDef::new("verified", Boolean).generated(),
        ColumnDef::new("verified_at", Timestamp).nullable(),
        created_at(),
    ],
};

/// Linked third-party identities. `(provider, provider_user_id)` is unique.
pub const OAUTH_PROVIDER: TableDef = TableDef {
    name: "oauth_provider",
    columns: &[
        id(),
        person_id(),
        ColumnDef::new("provider", VarChar(50)),
        ColumnDef::new("provider_user_id", VarChar(255)),
        ColumnDef::new("access_token", Text).nullable(),
        ColumnDef::new("refresh_token", Text).nullable(),
        ColumnDef::new("token_expires_at", Timestamp).nullable(),
        created_at(),
        ColumnDef::new("updated_at", Timestamp).nullable().generated(),
    ],
};

pub const PASSWORD_HISTORY: TableDef = TableDef {
    name: "password_history",
    columns: &[
        id(),
        person_id(),
        ColumnDef::new("password_hash", VarChar(255)),
        created_at(),
    ],
};

pub const TWO_FA_BACKUP_CODE: TableDef = TableDef {
    name: "two_fa_backup_code",
    columns: &[
        id(),
        person_id(),
        ColumnDef::new("code_hash", VarChar(255)),
        ColumnDef::new("used", Boolean).generated(),
        ColumnDef::new("used_at", Timestamp).nullable(),
        created_at(),
    ],
};

/// Audit log of sign-in attempts. Deliberately not tied to `person`, so
/// attempts against unknown or deleted accounts are kept.
pub const LOGIN_ATTEMPT: TableDef = TableDef {
    name: "login_attempt",
    columns: &[
        id(),
        ColumnDef::new("email", VarChar(255)),
        ColumnDef::new("ip_address", VarChar(45)),
        ColumnDef::new("user_agent", Text).nullable(),
        ColumnDef::new("success", Boolean),
        ColumnDef::new("failure_reason", Text).nullable(),
        ColumnDef::new("attempted_at", Timestamp).generated(),
    ],
};

/// Every table in the contract, parents before children.
pub static TABLES: &[&TableDef] = &[
    &PERSON,
    &REFRESH_TOKEN,
    &PASSWORD_RESET_TOKEN,
    &EMAIL_VERIFICATION_TOKEN,
    &OAUTH_PROVIDER,
    &PASSWORD_HISTORY,
    &TWO_FA_BACKUP_CODE,
    &LOGIN_ATTEMPT,
];

/// Looks up a table by name.
///
/// # Errors
///
/// Returns `SchemaError::UnknownTable` if `name` is not in [`TABLES`].
pub fn table(name: &str) -> Result<&'static TableDef, SchemaError> {
    TABLES
        .iter()
        .copied()
        .find(|t| t.name == name)
        .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_lookup_by_name() {
        let person = table("person").expect("person should be in the contract");
        assert_eq!(person.name, "person");

        let err = table("users").expect_err("users is not a canonical name");
        assert_eq!(err, SchemaError::UnknownTable("users".to_string()));
    }

    #[test]
    fn names_are_unique() {
        let tables: HashSet<_> = TABLES.iter().map(|t| t.name).collect();
        assert_eq!(tables.len(), TABLES.len());

        for t in TABLES {
            let columns: HashSet<_> = t.columns.iter().map(|c| c.name).collect();
            assert_eq!(columns.len(), t.columns.len(), "duplicate column in {}", t.name);
        }
    }

    #[test]
    fn every_table_has_generated_uuid_key() {
        for t in TABLES {
            let id = t.column("id").expect("every table has an id");
            assert_eq!(id.ty, ColumnType::Uuid, "{}", t.name);
            assert!(id.generated && !id.nullable, "{}", t.name);
        }
    }

    #[test]
    fn child_tables_reference_person() {
        for t in TABLES.iter().filter(|t| t.name != "person" && t.name != "login_attempt") {
            let owner = t
                .column("person_id")
                .unwrap_or_else(|| panic!("{} should reference person", t.name));
            assert!(!owner.nullable, "{}.person_id must be mandatory", t.name);
        }
        assert!(LOGIN_ATTEMPT.column("person_id").is_none());
    }

    #[test]
    fn updated_at_only_on_trigger_maintained_tables() {
        let with_updated_at: Vec<_> = TABLES
            .iter()
            .filter(|t| t.column("updated_at").is_some())
            .map(|t| t.name)
            .collect();
        assert_eq!(with_updated_at, vec!["person", "oauth_provider"]);
    }

    #[test]
    fn validate_columns_reports_first_unknown() {
        assert!(PERSON.validate_columns(&["email", "deleted_at"]).is_ok());

        let err = PERSON
            .validate_columns(&["email", "user_id", "nope"])
            .expect_err("user_id is not a person column");
        assert_eq!(
            err,
            SchemaError::UnknownColumn {
                table: "person",
                column: "user_id".to_string(),
            }
        );
    }

    #[test]
    fn column_list_preserves_declaration_order() {
        assert_eq!(
            PASSWORD_HISTORY.column_list(),
            "id, person_id, password_hash, created_at"
        );
    }
}
