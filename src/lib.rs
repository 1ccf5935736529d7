//! sqlkv - a durable key-value store on top of a relational database.
//!
//! A [`Store`] maps text keys to byte values in a single three-column
//! table (`key`, `value`, `updated_at`). Writes are atomic upserts that stay
//! correct under concurrent writers, and transient database failures
//! (deadlocks, lock timeouts, dropped connections) are retried with
//! exponential backoff.
//!
//! # Architecture
//!
//! - **`dialect`** - Per-engine SQL: upsert plans, idempotent table
//!   creation, key pagination, and classification of driver errors
//! - **`connection`** - r2d2 connection pool, sessions, and scoped
//!   transactions
//! - **`retry`** - Bounded exponential-backoff retry loop driven by
//!   [`ErrorKind`]
//! - **`store`** - The public get/put/delete/exists/keys/clear surface
//!
//! # Modules
//!
//! - [`cancel`] - Cancellation tokens with optional deadlines
//! - [`config`] - Configuration loading from TOML files
//! - [`error`] - Error types for the crate
//! - [`cli`] - Command-line interface for the `sqlkv` binary
//!
//! # Features
//!
//! - `sqlite` (default) - Embedded SQLite, bundled
//! - `postgres` - Postgres via libpq
//! - `mysql` - MySQL and MariaDB via libmysqlclient
//! - `testkit` - Fault injection hooks for tests
//!
//! Oracle and SQL Server statements are generated and classified, but no
//! driver is compiled in; opening them fails with
//! [`ConfigError::UnsupportedDialect`].
//!
//! # Example
//!
//! ```no_run
//! use sqlkv::config::{DatabaseConfig, StoreConfig};
//! use sqlkv::Store;
//!
//! # fn main() -> sqlkv::Result<()> {
//! let store = Store::open(
//!     "cache",
//!     &StoreConfig {
//!         database: DatabaseConfig::sqlite_memory(),
//!         ..StoreConfig::default()
//!     },
//! )?;
//! store.put("greeting", b"hello")?;
//! assert!(store.exists("greeting")?);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod cli;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod retry;
pub mod store;

pub use cancel::CancelToken;
pub use dialect::{Dialect, UpsertMode};
pub use error::{ConfigError, Error, ErrorKind, Result, ValidationError};
pub use store::{Entry, Keys, Store};
