//! Command-line interface definitions.

pub mod check;
pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;

/// Config file picked up from the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG: &str = "sqlkv.toml";

/// sqlkv - a key-value store on top of SQL databases.
#[derive(Parser, Debug)]
#[command(name = "sqlkv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (default: ./sqlkv.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the store name
    #[arg(short, long, global = true)]
    pub store: Option<String>,

    /// Override log level (debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Use JSON log format instead of pretty
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a value
    Put(PutArgs),

    /// Print the value stored under a key
    Get(GetArgs),

    /// Delete a key
    Delete(KeyArg),

    /// Report whether a key exists (exit code 1 if not)
    Exists(KeyArg),

    /// List keys in order
    Keys(KeysArgs),

    /// Delete every entry
    Clear,

    /// Print a value and delete its key
    Pop(KeyArg),

    /// Print the number of entries
    Len,

    /// Validate configuration and test the database connection
    Check,
}

/// Shared argument for commands that take a single key.
#[derive(Parser, Debug)]
pub struct KeyArg {
    pub key: String,
}

/// Arguments for the `put` subcommand.
#[derive(Parser, Debug)]
pub struct PutArgs {
    pub key: String,

    /// Value, stored as UTF-8 bytes
    pub value: String,
}

/// Arguments for the `get` subcommand.
#[derive(Parser, Debug)]
pub struct GetArgs {
    pub key: String,

    /// Print key, value and timestamp as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `keys` subcommand.
#[derive(Parser, Debug)]
pub struct KeysArgs {
    /// Only list keys starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

impl Cli {
    /// Load configuration and apply command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the result
    /// fails validation.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None if Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG)?,
            None => Config::parse_toml("")?,
        };

        if let Some(store) = &self.store {
            config.store_name = store.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.format = "json".to_string();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Open the configured store and run the parsed command against it.
///
/// # Errors
///
/// Returns the first store or configuration error.
pub fn execute(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    let store = config
        .open_store()
        .with_context(|| format!("failed to open store '{}'", config.store_name))?;
    let code = commands::execute(&store, &cli.command)?;
    store.close();
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["sqlkv", "get", "k", "--store", "cache", "--json"]).unwrap();
        assert_eq!(cli.store.as_deref(), Some("cache"));
        assert!(matches!(cli.command, Commands::Get(GetArgs { ref key, json: true }) if key == "k"));
    }

    #[test]
    fn put_requires_value() {
        assert!(Cli::try_parse_from(["sqlkv", "put", "k"]).is_err());
    }

    #[test]
    fn overrides_apply_to_loaded_config() {
        let cli = Cli::try_parse_from([
            "sqlkv",
            "--store",
            "sessions",
            "--log-level",
            "debug",
            "--json-logs",
            "len",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.store_name, "sessions");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }
}
