//! The `migrate` tool for the authentication store's schema migration
//! units.
//!
//! The binary is a thin wrapper; parsing, configuration and command
//! execution live here so they can be tested without spawning a process.

mod cli;
mod config;

pub use cli::{format_run, format_status, run, CliError, Command, USAGE};
pub use config::{
    apply_overrides, config_path, load_config, Config, ConfigError, LoggingConfig,
    MigrationsConfig, DEFAULT_CONFIG_PATH,
};
