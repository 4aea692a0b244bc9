//! Authentication schema: accounts, tokens, linked identities, audit log.

use authstore_types::ColumnType::{Boolean, Integer, Text, Timestamp, Uuid, VarChar};

use super::MigrationUnit;
use crate::ops::{
    ColumnSpec as Col, DefaultValue, IndexSpec, OnDelete, SchemaOp, TableSpec,
};

pub struct Migration;

/// Tables in creation order; teardown walks this backwards.
const TABLES: &[&str] = &[
    "person",
    "refresh_token",
    "password_reset_token",
    "email_verification_token",
    "oauth_provider",
    "password_history",
    "two_fa_backup_code",
    "login_attempt",
];

/// Tables whose `updated_at` is stamped by trigger.
const TOUCHED_TABLES: &[&str] = &["person", "oauth_provider"];

fn id() -> Col {
    Col::new("id", Uuid)
        .primary_key()
        .default(DefaultValue::GeneratedUuid)
}

fn owner() -> Col {
    Col::new("person_id", Uuid)
        .not_null()
        .references("person", "id", OnDelete::Cascade)
}

fn token_hash() -> Col {
    Col::new("token_hash", VarChar(255)).not_null().unique()
}

fn flag(name: &str, default: bool) -> Col {
    Col::new(name, Boolean)
        .not_null()
        .default(DefaultValue::Bool(default))
}

fn now(name: &str) -> Col {
    Col::new(name, Timestamp)
        .not_null()
        .default(DefaultValue::CurrentTimestamp)
}

fn table(name: &str, columns: Vec<Col>) -> SchemaOp {
    SchemaOp::CreateTable(TableSpec::new(name, columns))
}

fn index(name: &str, table: &str, columns: &[&str]) -> SchemaOp {
    SchemaOp::CreateIndex(IndexSpec::new(name, table, columns))
}

impl MigrationUnit for Migration {
    fn name(&self) -> &str {
        "m20251008_110754_initial_schema"
    }

    fn up(&self) -> Vec<SchemaOp> {
        let mut ops = vec![
            SchemaOp::CreateExtension("uuid-ossp".to_string()),
            SchemaOp::CreateTimestampFunction,
            table(
                "person",
                vec![
                    id(),
                    Col::new("email", VarChar(255)).not_null().unique(),
                    Col::new("password_hash", VarChar(255)).not_null(),
                    Col::new("first_name", VarChar(100)),
                    Col::new("last_name", VarChar(100)),
                    Col::new("avatar_url", Text),
                    flag("email_verified", false),
                    Col::new("email_verified_at", Timestamp),
                    flag("is_active", true),
                    flag("is_2fa_enabled", false),
                    Col::new("two_fa_secret", VarChar(255)),
                    Col::new("failed_login_attempts", Integer)
                        .not_null()
                        .default(DefaultValue::Int(0)),
                    Col::new("locked_until", Timestamp),
                    Col::new("last_login_at", Timestamp),
                    now("created_at"),
                    Col::new("updated_at", Timestamp),
                    Col::new("deleted_at", Timestamp),
                ],
            ),
            index("idx_person_email", "person", &["email"]),
            table(
                "refresh_token",
                vec![
                    id(),
                    owner(),
                    token_hash(),
                    Col::new("expires_at", Timestamp).not_null(),
                    Col::new("device_name", VarChar(255)),
                    Col::new("device_type", VarChar(50)),
                    Col::new("ip_address", VarChar(45)),
                    Col::new("user_agent", Text),
                    flag("is_revoked", false),
                    Col::new("revoked_at", Timestamp),
                    Col::new("last_used_at", Timestamp),
                    now("created_at"),
                ],
            ),
            index("idx_refresh_token_person_id", "refresh_token", &["person_id"]),
            index("idx_refresh_token_expires_at", "refresh_token", &["expires_at"]),
            table(
                "password_reset_token",
                vec![
                    id(),
                    owner(),
                    token_hash(),
                    Col::new("expires_at", Timestamp).not_null(),
                    flag("used", false),
                    Col::new("used_at", Timestamp),
                    now("created_at"),
                ],
            ),
            index(
                "idx_password_reset_token_person_id",
                "password_reset_token",
                &["person_id"],
            ),
            table(
                "email_verification_token",
                vec![
                    id(),
                    owner(),
                    token_hash(),
                    Col::new("expires_at", Timestamp).not_null(),
                    flag("verified", false),
                    Col::new("verified_at", Timestamp),
                    now("created_at"),
                ],
            ),
            index(
                "idx_email_verification_token_person_id",
                "email_verification_token",
                &["person_id"],
            ),
            table(
                "oauth_provider",
                vec![
                    id(),
                    owner(),
                    Col::new("provider", VarChar(50)).not_null(),
                    Col::new("provider_user_id", VarChar(255)).not_null(),
                    Col::new("access_token", Text),
                    Col::new("refresh_token", Text),
                    Col::new("token_expires_at", Timestamp),
                    now("created_at"),
                    Col::new("updated_at", Timestamp),
                ],
            ),
            SchemaOp::CreateIndex(
                IndexSpec::new(
                    "idx_oauth_provider_user",
                    "oauth_provider",
                    &["provider", "provider_user_id"],
                )
                .unique(),
            ),
            index("idx_oauth_provider_person_id", "oauth_provider", &["person_id"]),
            table(
                "password_history",
                vec![
                    id(),
                    owner(),
                    Col::new("password_hash", VarChar(255)).not_null(),
                    now("created_at"),
                ],
            ),
            index(
                "idx_password_history_person_id",
                "password_history",
                &["person_id"],
            ),
            table(
                "two_fa_backup_code",
                vec![
                    id(),
                    owner(),
                    Col::new("code_hash", VarChar(255)).not_null(),
                    flag("used", false),
                    Col::new("used_at", Timestamp),
                    now("created_at"),
                ],
            ),
            index(
                "idx_two_fa_backup_code_person_id",
                "two_fa_backup_code",
                &["person_id"],
            ),
            table(
                "login_attempt",
                vec![
                    id(),
                    Col::new("email", VarChar(255)).not_null(),
                    Col::new("ip_address", VarChar(45)).not_null(),
                    Col::new("user_agent", Text),
                    Col::new("success", Boolean).not_null(),
                    Col::new("failure_reason", Text),
                    now("attempted_at"),
                ],
            ),
            index(
                "idx_login_attempt_email_time",
                "login_attempt",
                &["email", "attempted_at"],
            ),
            index(
                "idx_login_attempt_ip_time",
                "login_attempt",
                &["ip_address", "attempted_at"],
            ),
        ];

        ops.extend(TOUCHED_TABLES.iter().map(|t| SchemaOp::CreateUpdatedAtTrigger {
            table: t.to_string(),
        }));
        ops
    }

    fn down(&self) -> Vec<SchemaOp> {
        let mut ops: Vec<SchemaOp> = TABLES
            .iter()
            .rev()
            .map(|t| SchemaOp::DropTable {
                name: t.to_string(),
            })
            .collect();
        ops.push(SchemaOp::DropTimestampFunction);
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{render_all, Dialect};

    #[test]
    fn teardown_drops_children_before_person() {
        let drops: Vec<_> = Migration
            .down()
            .into_iter()
            .filter_map(|op| match op {
                SchemaOp::DropTable { name } => Some(name),
                _ => None,
            })
            .collect();

        assert_eq!(drops.first().map(String::as_str), Some("login_attempt"));
        assert_eq!(drops.last().map(String::as_str), Some("person"));
        assert_eq!(drops.len(), TABLES.len());
    }

    #[test]
    fn postgres_rendering_matches_reference_shape() {
        let up = render_all(&Migration.up(), Dialect::Postgres);
        assert_eq!(up[0], "CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\"");
        assert!(up[1].starts_with("CREATE OR REPLACE FUNCTION update_updated_at_column()"));
        assert!(up
            .iter()
            .any(|s| s.starts_with("CREATE TRIGGER update_oauth_provider_updated_at")));

        let down = render_all(&Migration.down(), Dialect::Postgres);
        assert_eq!(
            down.last().map(String::as_str),
            Some("DROP FUNCTION IF EXISTS update_updated_at_column CASCADE")
        );
    }

    #[test]
    fn tables_match_the_contract() {
        for op in Migration.up() {
            let SchemaOp::CreateTable(spec) = op else {
                continue;
            };
            let contract = authstore_types::table(&spec.name)
                .unwrap_or_else(|e| panic!("{} missing from contract: {e}", spec.name));

            let names: Vec<_> = spec.columns.iter().map(|c| c.name.as_str()).collect();
            let expected: Vec<_> = contract.columns.iter().map(|c| c.name).collect();
            assert_eq!(names, expected, "column order for {}", spec.name);

            for (col, def) in spec.columns.iter().zip(contract.columns) {
                assert_eq!(col.ty, def.ty, "{}.{}", spec.name, col.name);
                assert_eq!(!col.not_null, def.nullable, "{}.{}", spec.name, col.name);
            }
        }
    }
}
