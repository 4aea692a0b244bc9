//! Row mapping and contract-checked lookups.

use authstore_types::{
    EmailVerificationToken, LoginAttempt, OAuthProvider, PasswordHistory, PasswordResetToken,
    Person, RefreshToken, SchemaError, TableDef, TwoFaBackupCode, EMAIL_VERIFICATION_TOKEN,
    LOGIN_ATTEMPT, OAUTH_PROVIDER, PASSWORD_HISTORY, PASSWORD_RESET_TOKEN, PERSON, REFRESH_TOKEN,
    TWO_FA_BACKUP_CODE,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when querying typed records.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The filter column is not part of the table's contract.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The query itself failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A typed row backed by one table of the contract.
pub trait Record: Sized {
    /// The table this record is read from.
    const TABLE: &'static TableDef;

    /// Builds the record from a row selected with `TABLE.column_list()`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Reads a UUID stored as text.
fn uuid_column(row: &Row<'_>, column: &str) -> rusqlite::Result<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

/// Fetches one record by primary key.
///
/// # Errors
///
/// Returns `QueryError::Database` if the query fails or a column cannot be
/// decoded.
pub fn find_by_id<T: Record>(conn: &Connection, id: Uuid) -> Result<Option<T>, QueryError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        T::TABLE.column_list(),
        T::TABLE.name
    );
    let record = conn
        .query_row(&sql, [id.to_string()], T::from_row)
        .optional()?;
    Ok(record)
}

/// Fetches every record whose `column` equals `value`, in insertion order.
///
/// # Errors
///
/// Returns `QueryError::Schema` if `column` is not in the contract for
/// `T::TABLE`; no SQL is issued in that case.
pub fn find_by<T: Record>(
    conn: &Connection,
    column: &str,
    value: &dyn ToSql,
) -> Result<Vec<T>, QueryError> {
    T::TABLE.validate_columns(&[column])?;

    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 ORDER BY rowid",
        T::TABLE.column_list(),
        T::TABLE.name,
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([value], T::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

impl Record for Person {
    const TABLE: &'static TableDef = &PERSON;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            avatar_url: row.get("avatar_url")?,
            email_verified: row.get("email_verified")?,
            email_verified_at: row.get("email_verified_at")?,
            is_active: row.get("is_active")?,
            is_2fa_enabled: row.get("is_2fa_enabled")?,
            two_fa_secret: row.get("two_fa_secret")?,
            failed_login_attempts: row.get("failed_login_attempts")?,
            locked_until: row.get("locked_until")?,
            last_login_at: row.get("last_login_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

impl Record for RefreshToken {
    const TABLE: &'static TableDef = &REFRESH_TOKEN;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            person_id: uuid_column(row, "person_id")?,
            token_hash: row.get("token_hash")?,
            expires_at: row.get("expires_at")?,
            device_name: row.get("device_name")?,
            device_type: row.get("device_type")?,
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
            is_revoked: row.get("is_revoked")?,
            revoked_at: row.get("revoked_at")?,
            last_used_at: row.get("last_used_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Record for PasswordResetToken {
    const TABLE: &'static TableDef = &PASSWORD_RESET_TOKEN;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            person_id: uuid_column(row, "person_id")?,
            token_hash: row.get("token_hash")?,
            expires_at: row.get("expires_at")?,
            used: row.get("used")?,
            used_at: row.get("used_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Record for EmailVerificationToken {
    const TABLE: &'static TableDef = &EMAIL_VERIFICATION_TOKEN;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            person_id: uuid_column(row, "person_id")?,
            token_hash: row.get("token_hash")?,
            expires_at: row.get("expires_at")?,
            verified: row.get("verified")?,
            verified_at: row.get("verified_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Record for OAuthProvider {
    const TABLE: &'static TableDef = &OAUTH_PROVIDER;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            person_id: uuid_column(row, "person_id")?,
            provider: row.get("provider")?,
            provider_user_id: row.get("provider_user_id")?,
            access_token: row.get("access_token")?,
            refresh_token: row.get("refresh_token")?,
            token_expires_at: row.get("token_expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl Record for PasswordHistory {
    const TABLE: &'static TableDef = &PASSWORD_HISTORY;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            person_id: uuid_column(row, "person_id")?,
            password_hash: row.get("password_hash")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Record for TwoFaBackupCode {
    const TABLE: &'static TableDef = &TWO_FA_BACKUP_CODE;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            person_id: uuid_column(row, "person_id")?,
            code_hash: row.get("code_hash")?,
            used: row.get("used")?,
            used_at: row.get("used_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Record for LoginAttempt {
    const TABLE: &'static TableDef = &LOGIN_ATTEMPT;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            email: row.get("email")?,
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
            success: row.get("success")?,
            failure_reason: row.get("failure_reason")?,
            attempted_at: row.get("attempted_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn migrated_db() -> Connection {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("should enable foreign keys");
        run_migrations(&mut conn).expect("should apply migrations");
        conn
    }

    fn insert_person(conn: &Connection, email: &str) -> Uuid {
        let id: String = conn
            .query_row(
                "INSERT INTO person (email, password_hash) VALUES (?1, 'hash') RETURNING id",
                [email],
                |row| row.get(0),
            )
            .expect("should insert person");
        Uuid::parse_str(&id).expect("generated id should be a uuid")
    }

    #[test]
    fn person_defaults_round_trip() {
        let conn = migrated_db();
        let id = insert_person(&conn, "ada@example.com");

        let person: Person = find_by_id(&conn, id)
            .expect("query should succeed")
            .expect("person should exist");

        assert_eq!(person.id, id);
        assert_eq!(id.get_version_num(), 4);
        assert_eq!(person.email, "ada@example.com");
        assert!(!person.email_verified);
        assert!(person.is_active);
        assert!(!person.is_2fa_enabled);
        assert_eq!(person.failed_login_attempts, 0);
        assert!(person.updated_at.is_none());
        assert!(!person.is_deleted());
    }

    #[test]
    fn missing_id_is_none() {
        let conn = migrated_db();
        let found: Option<Person> =
            find_by_id(&conn, Uuid::new_v4()).expect("query should succeed");
        assert!(found.is_none());
    }

    #[test]
    fn find_by_filters_on_contract_column() {
        let conn = migrated_db();
        let owner = insert_person(&conn, "owner@example.com");
        let other = insert_person(&conn, "other@example.com");

        for (person, hash) in [(owner, "a"), (owner, "b"), (other, "c")] {
            conn.execute(
                "INSERT INTO password_history (person_id, password_hash) VALUES (?1, ?2)",
                (person.to_string(), hash),
            )
            .expect("should insert history");
        }

        let history: Vec<PasswordHistory> =
            find_by(&conn, "person_id", &owner.to_string()).expect("query should succeed");
        let hashes: Vec<_> = history.iter().map(|h| h.password_hash.as_str()).collect();
        assert_eq!(hashes, ["a", "b"]);
        assert!(history.iter().all(|h| h.person_id == owner));
    }

    #[test]
    fn find_by_rejects_unknown_column() {
        let conn = migrated_db();

        let err = find_by::<Person>(&conn, "email; DROP TABLE person", &"x")
            .expect_err("column must be validated");
        assert!(matches!(
            err,
            QueryError::Schema(SchemaError::UnknownColumn { table: "person", .. })
        ));
    }

    #[test]
    fn malformed_uuid_is_a_conversion_error() {
        let conn = migrated_db();
        conn.execute(
            "INSERT INTO login_attempt (id, email, ip_address, success)
             VALUES ('not-a-uuid', 'x@example.com', '10.0.0.1', 0)",
            [],
        )
        .expect("should insert attempt");

        let err = find_by::<LoginAttempt>(&conn, "email", &"x@example.com")
            .expect_err("id should fail to decode");
        assert!(matches!(
            err,
            QueryError::Database(rusqlite::Error::FromSqlConversionFailure(0, Type::Text, _))
        ));
    }
}
