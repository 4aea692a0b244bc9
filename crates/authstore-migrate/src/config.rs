//! Tool configuration loading from file and environment variables.

use authstore_db::DatabaseConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "authstore.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where `create` writes new units.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "authstore_db=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Migration source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding the unit modules.
    #[serde(default = "default_migrations_dir")]
    pub dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_migrations_dir() -> String {
    "crates/authstore-db/src/migrations".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override did not parse.
    #[error(transparent)]
    Env(#[from] authstore_db::ConfigError),
}

/// Resolves the configuration file path from `AUTHSTORE_CONFIG_PATH`.
pub fn config_path() -> String {
    std::env::var("AUTHSTORE_CONFIG_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides.
///
/// Environment variable overrides:
/// - `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`,
///   `DB_BUSY_TIMEOUT_MS`, `DB_POOL_MAX_SIZE`, `DB_POOL_TIMEOUT_MS`
///   override the `database` table
/// - `MIGRATIONS_DIR` overrides `migrations.dir`
/// - `AUTHSTORE_LOG_LEVEL` overrides `logging.level`
/// - `AUTHSTORE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if a numeric override does not parse.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a variable name to its value
/// when set.
///
/// # Errors
///
/// Returns `ConfigError::Env` if a numeric database override does not
/// parse.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    config.database.apply_overrides(&lookup)?;

    if let Some(dir) = lookup("MIGRATIONS_DIR") {
        config.migrations.dir = dir;
    }
    if let Some(level) = lookup("AUTHSTORE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("AUTHSTORE_LOG_JSON") {
        config.logging.json = json.eq_ignore_ascii_case("true") || json == "1";
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let missing = dir.path().join("absent.toml");
        assert!(load_config(missing.to_str()).is_ok());

        let mut config = Config::default();
        apply_overrides(&mut config, lookup_from(&[])).expect("no overrides");
        assert_eq!(config.database.name, "auth_db");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.migrations.dir, "crates/authstore-db/src/migrations");
    }

    #[test]
    fn parses_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [database]
            name = "staging"
            port = 6543
            pool_max_size = 2

            [logging]
            level = "debug"
            json = true

            [migrations]
            dir = "db/units"
            "#,
        )
        .expect("should parse");

        assert_eq!(config.database.name, "staging");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.pool_max_size, 2);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.migrations.dir, "db/units");
    }

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("authstore.toml");
        std::fs::write(&path, "[database]\nname = \"from_file\"\n").expect("should write config");

        let contents = std::fs::read_to_string(&path).expect("should read config");
        let mut config: Config = toml::from_str(&contents).expect("should parse");
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("DB_NAME", "from_env"),
                ("DB_PASSWORD", "hunter2"),
                ("MIGRATIONS_DIR", "/tmp/units"),
                ("AUTHSTORE_LOG_LEVEL", "warn"),
                ("AUTHSTORE_LOG_JSON", "TRUE"),
            ]),
        )
        .expect("overrides should apply");

        assert_eq!(config.database.name, "from_env");
        assert_eq!(config.database.password.as_deref(), Some("hunter2"));
        assert_eq!(config.migrations.dir, "/tmp/units");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json);
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn bad_numeric_override_is_an_error() {
        let mut config = Config::default();
        let err = apply_overrides(&mut config, lookup_from(&[("DB_PORT", "not-a-port")]))
            .expect_err("port must parse");
        assert!(matches!(err, ConfigError::Env(e) if e.var == "DB_PORT"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[database\n").expect("should write config");

        let err = load_config(path.to_str()).expect_err("broken TOML should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
