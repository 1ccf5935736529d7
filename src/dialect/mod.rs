//! Per-engine SQL knowledge.
//!
//! [`Dialect`] is a closed set of supported engines. Everything that differs
//! between them (upsert syntax, conditional table creation, row limits,
//! placeholders, identifier quoting, error vocabulary) is answered here, and
//! resolved once into an immutable [`Statements`] value when a store opens.

mod classify;
mod statements;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use classify::{DriverFailure, ErrorClass, FailureKind};
pub use statements::{Statements, UpsertPlan};

/// Number of keys fetched per page by key enumeration.
pub const KEY_PAGE_SIZE: u32 = 256;

/// Longest store name accepted on every engine (Oracle's classic limit).
pub const MAX_STORE_NAME_LEN: usize = 30;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded file (or in-memory) engine.
    Sqlite,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    /// MySQL and MariaDB.
    #[serde(alias = "mariadb")]
    Mysql,
    Oracle,
    #[serde(alias = "mssql")]
    Sqlserver,
}

/// Which upsert plan to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertMode {
    /// Native single-statement upsert where the engine has a race-free one.
    #[default]
    Auto,
    /// Always insert, and turn key conflicts into an update on the next attempt.
    Fallback,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Sqlite,
        Dialect::Postgres,
        Dialect::Mysql,
        Dialect::Oracle,
        Dialect::Sqlserver,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::Sqlserver => "sqlserver",
        }
    }

    /// Maximum key length in characters, bounded by the primary key column.
    #[must_use]
    pub const fn max_key_len(self) -> usize {
        match self {
            Dialect::Sqlite | Dialect::Postgres => 1024,
            Dialect::Mysql => 255,
            Dialect::Oracle => 1000,
            Dialect::Sqlserver => 450,
        }
    }

    /// Default TCP port for client/server engines.
    #[must_use]
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Postgres => Some(5432),
            Dialect::Mysql => Some(3306),
            Dialect::Oracle => Some(1521),
            Dialect::Sqlserver => Some(1433),
        }
    }

    /// Whether the engine has an upsert statement that cannot report a
    /// duplicate-key error under concurrent writers of the same key.
    #[must_use]
    pub const fn has_native_upsert(self) -> bool {
        !matches!(self, Dialect::Oracle)
    }

    /// Quote an identifier.
    #[must_use]
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Sqlserver => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Positional bind placeholder, 1-based.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
            Dialect::Oracle => format!(":{n}"),
            Dialect::Sqlserver => format!("@P{n}"),
        }
    }

    /// SQL expression for "now" in UTC, evaluated by the database.
    #[must_use]
    pub const fn now_utc(self) -> &'static str {
        match self {
            Dialect::Sqlite => "CURRENT_TIMESTAMP",
            Dialect::Postgres => "(NOW() AT TIME ZONE 'UTC')",
            Dialect::Mysql => "UTC_TIMESTAMP(6)",
            Dialect::Oracle => "SYS_EXTRACT_UTC(SYSTIMESTAMP)",
            Dialect::Sqlserver => "SYSUTCDATETIME()",
        }
    }

    /// Capability: atomic upsert plan for `table`.
    #[must_use]
    pub fn build_upsert(self, table: &str, mode: UpsertMode) -> UpsertPlan {
        statements::upsert(self, table, mode)
    }

    /// Capability: idempotent table creation for `table`.
    #[must_use]
    pub fn build_create_table(self, table: &str) -> String {
        statements::create_table(self, table)
    }

    /// Capability: classify a driver failure.
    #[must_use]
    pub fn classify(self, failure: &DriverFailure) -> ErrorClass {
        classify::classify(self, failure)
    }

    /// Build every statement a store needs.
    #[must_use]
    pub fn statements(self, table: &str, mode: UpsertMode) -> Statements {
        Statements::build(self, table, mode)
    }

    /// Bind value matching every key that starts with `prefix`, for the
    /// statement in [`Statements::delete_prefix`].
    #[must_use]
    pub fn prefix_pattern(self, prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        if self == Dialect::Sqlite {
            // GLOB is case-sensitive, unlike SQLite's default LIKE.
            for c in prefix.chars() {
                match c {
                    '*' | '?' | '[' => {
                        pattern.push('[');
                        pattern.push(c);
                        pattern.push(']');
                    }
                    _ => pattern.push(c),
                }
            }
            pattern.push('*');
        } else {
            for c in prefix.chars() {
                let special = matches!(c, '!' | '%' | '_')
                    || (self == Dialect::Sqlserver && c == '[');
                if special {
                    pattern.push('!');
                }
                pattern.push(c);
            }
            pattern.push('%');
        }
        pattern
    }

    /// Statements run on every freshly established connection.
    #[must_use]
    pub fn session_setup(self, lock_timeout: Duration, file_backed: bool) -> Vec<String> {
        let ms = lock_timeout.as_millis().max(1);
        match self {
            Dialect::Sqlite => {
                let mut setup = vec![format!("PRAGMA busy_timeout = {ms}")];
                if file_backed {
                    setup.push("PRAGMA journal_mode = WAL".to_string());
                    setup.push("PRAGMA synchronous = NORMAL".to_string());
                }
                setup
            }
            Dialect::Postgres => vec![format!("SET lock_timeout = {ms}")],
            Dialect::Mysql => {
                let secs = lock_timeout.as_secs().max(1);
                vec![
                    format!("SET SESSION innodb_lock_wait_timeout = {secs}"),
                    "SET SESSION time_zone = '+00:00'".to_string(),
                ]
            }
            Dialect::Oracle => vec!["ALTER SESSION SET TIME_ZONE = 'UTC'".to_string()],
            Dialect::Sqlserver => vec![format!("SET LOCK_TIMEOUT {ms}")],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "oracle" => Ok(Dialect::Oracle),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            _ => Err(ConfigError::UnknownDialect(s.to_string())),
        }
    }
}

/// Check a store name against the identifier rules shared by all engines.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] naming `store_name`.
pub fn validate_store_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "store_name",
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("must not be empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("must start with a letter or underscore"));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("may only contain letters, digits and underscores"));
    }
    if name.len() > MAX_STORE_NAME_LEN {
        return Err(invalid(&format!(
            "must be at most {MAX_STORE_NAME_LEN} characters"
        )));
    }
    Ok(())
}
