//! Shared schema contract and row types for the authstore data layer.
//!
//! This crate is the single place where table and column names live. The
//! migration units in `authstore-db` materialize these tables, and query
//! code validates its column references against the same [`TableDef`]
//! constants, so the two sides cannot drift apart silently.
//!
//! # Naming
//!
//! Tables are singular snake_case. The account table is `person`, and every
//! table owned by an account references it through a `person_id` column.

mod rows;
mod schema;

pub use rows::{
    EmailVerificationToken, LoginAttempt, OAuthProvider, PasswordHistory, PasswordResetToken,
    Person, RefreshToken, TwoFaBackupCode,
};
pub use schema::{
    table, ColumnDef, ColumnType, SchemaError, TableDef, EMAIL_VERIFICATION_TOKEN, LOGIN_ATTEMPT,
    OAUTH_PROVIDER, PASSWORD_HISTORY, PASSWORD_RESET_TOKEN, PERSON, REFRESH_TOKEN, TABLES,
    TWO_FA_BACKUP_CODE,
};
