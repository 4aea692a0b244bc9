//! Database connection configuration.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::pool::DbRuntimeSettings;

/// Connection target and pool tunables.
///
/// The target fields follow the deployment environment contract (`DB_HOST`,
/// `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`). The embedded engine
/// opens the local file named by [`DatabaseConfig::database_path`], so host,
/// port and credentials must stay at their local defaults; see
/// [`DatabaseConfig::unsupported_setting`].
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name. Selects the database file.
    #[serde(default = "default_name")]
    pub name: String,

    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password. Never logged.
    #[serde(default)]
    pub password: Option<String>,

    /// Busy timeout for each connection, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// How long a pool checkout may wait, in milliseconds.
    #[serde(default = "default_pool_timeout_ms")]
    pub pool_timeout_ms: u64,
}

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_name() -> String {
    "auth_db".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_pool_timeout_ms() -> u64 {
    DbRuntimeSettings::default().pool_timeout_ms
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: default_name(),
            user: default_user(),
            password: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            pool_timeout_ms: default_pool_timeout_ms(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("pool_max_size", &self.pool_max_size)
            .field("pool_timeout_ms", &self.pool_timeout_ms)
            .finish()
    }
}

/// An environment override that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value for {var}: '{value}'")]
pub struct ConfigError {
    /// The environment variable name.
    pub var: &'static str,
    /// The raw value that failed to parse.
    pub value: String,
}

impl DatabaseConfig {
    /// Resolves the database file path from `name`.
    ///
    /// `:memory:` and names that already look like paths (containing `.` or
    /// `/`) are used as-is; a bare name gets a `.db` extension.
    pub fn database_path(&self) -> String {
        if self.name == ":memory:" || self.name.contains('.') || self.name.contains('/') {
            self.name.clone()
        } else {
            format!("{}.db", self.name)
        }
    }

    /// Pool tunables derived from this configuration.
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            pool_timeout_ms: self.pool_timeout_ms,
            read_only: false,
        }
    }

    /// Returns the first target setting that names something other than
    /// the local database, as `(variable, value)`.
    ///
    /// The host must be a loopback name, the port and user their defaults,
    /// and the password unset or empty. The password value is redacted.
    pub fn unsupported_setting(&self) -> Option<(&'static str, String)> {
        if !LOOPBACK_HOSTS.contains(&self.host.as_str()) {
            return Some(("DB_HOST", self.host.clone()));
        }
        if self.port != default_port() {
            return Some(("DB_PORT", self.port.to_string()));
        }
        if self.user != default_user() {
            return Some(("DB_USER", self.user.clone()));
        }
        if self.password.as_deref().is_some_and(|p| !p.is_empty()) {
            return Some(("DB_PASSWORD", "<redacted>".to_string()));
        }
        None
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value when set.
    ///
    /// Recognized variables: `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`,
    /// `DB_PASSWORD`, `DB_BUSY_TIMEOUT_MS`, `DB_POOL_MAX_SIZE`,
    /// `DB_POOL_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a numeric variable does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DB_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            self.port = parse_var("DB_PORT", port)?;
        }
        if let Some(name) = lookup("DB_NAME") {
            self.name = name;
        }
        if let Some(user) = lookup("DB_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(ms) = lookup("DB_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = parse_var("DB_BUSY_TIMEOUT_MS", ms)?;
        }
        if let Some(size) = lookup("DB_POOL_MAX_SIZE") {
            self.pool_max_size = parse_var("DB_POOL_MAX_SIZE", size)?;
        }
        if let Some(ms) = lookup("DB_POOL_TIMEOUT_MS") {
            self.pool_timeout_ms = parse_var("DB_POOL_TIMEOUT_MS", ms)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.name, "auth_db");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.database_path(), "auth_db.db");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = DatabaseConfig::default();
        config
            .apply_overrides(lookup(&[
                ("DB_HOST", "db.internal"),
                ("DB_PORT", "6543"),
                ("DB_NAME", "/var/lib/auth/auth.sqlite3"),
                ("DB_USER", "auth"),
                ("DB_PASSWORD", "s3cret"),
                ("DB_POOL_MAX_SIZE", "2"),
            ]))
            .expect("overrides should parse");

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.user, "auth");
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.pool_max_size, 2);
        assert_eq!(config.database_path(), "/var/lib/auth/auth.sqlite3");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = DatabaseConfig::default();
        let err = config
            .apply_overrides(lookup(&[("DB_PORT", "not-a-port")]))
            .expect_err("port must be numeric");
        assert_eq!(
            err,
            ConfigError {
                var: "DB_PORT",
                value: "not-a-port".to_string(),
            }
        );
    }

    #[test]
    fn debug_redacts_password() {
        let config = DatabaseConfig {
            password: Some("hunter2".to_string()),
            ..DatabaseConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn memory_name_is_used_verbatim() {
        let config = DatabaseConfig {
            name: ":memory:".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.database_path(), ":memory:");
    }

    #[test]
    fn local_defaults_are_supported() {
        assert_eq!(DatabaseConfig::default().unsupported_setting(), None);

        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            password: Some(String::new()),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.unsupported_setting(), None);
    }

    #[test]
    fn remote_target_settings_are_reported() {
        for (var, value, expected) in [
            ("DB_HOST", "db.prod.example.invalid", "db.prod.example.invalid"),
            ("DB_PORT", "6543", "6543"),
            ("DB_USER", "admin", "admin"),
            ("DB_PASSWORD", "wrong", "<redacted>"),
        ] {
            let mut config = DatabaseConfig::default();
            config
                .apply_overrides(lookup(&[(var, value)]))
                .expect("overrides should parse");
            assert_eq!(
                config.unsupported_setting(),
                Some((var, expected.to_string())),
                "{var} should be reported"
            );
        }
    }
}
