//! The key-value store.
//!
//! A [`Store`] is one table in one database. Every public operation runs as
//! a sequence of attempts under the store's [`RetryPolicy`]; each attempt
//! checks out a fresh session and, for writes, a fresh transaction, so
//! nothing is held across a backoff sleep.
//!
//! # Example
//!
//! ```no_run
//! use sqlkv::config::{DatabaseConfig, StoreConfig};
//! use sqlkv::Store;
//!
//! # fn main() -> sqlkv::Result<()> {
//! let config = StoreConfig {
//!     database: DatabaseConfig::sqlite_file("cache.db"),
//!     ..StoreConfig::default()
//! };
//! let store = Store::open("cache", &config)?;
//! store.put("a", b"1")?;
//! assert_eq!(store.get("a")?, Some(b"1".to_vec()));
//! for key in store.keys() {
//!     println!("{}", key?);
//! }
//! # Ok(())
//! # }
//! ```

mod keys;
mod validate;

#[cfg(any(test, feature = "testkit"))]
mod faults;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

pub use keys::Keys;

use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::connection::{ConnectionPool, PoolState, Session};
use crate::dialect::{validate_store_name, Dialect, Statements, UpsertPlan};
use crate::error::{ConfigError, Error, Result};
use crate::retry::RetryPolicy;

use validate::{validate_key, validate_prefix};

/// A stored value with its write timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    /// Database clock at the last successful write.
    pub updated_at: DateTime<Utc>,
}

/// A durable map from text keys to byte values, backed by one SQL table.
///
/// `Store` is `Send + Sync`; share it across threads with `Arc`.
pub struct Store {
    name: String,
    statements: Statements,
    pool: ConnectionPool,
    retry: RetryPolicy,
    cancel: CancelToken,
    operation_timeout: Option<Duration>,
    #[cfg(any(test, feature = "testkit"))]
    faults: faults::Faults,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("dialect", &self.dialect())
            .field("native_upsert", &self.statements.upsert.is_native())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the store `name`, creating its table if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for an invalid name or configuration, an
    ///   unsupported dialect, or a database that stays unreachable through
    ///   every retry ([`ConfigError::Unreachable`])
    /// - any fatal error raised while creating the table
    pub fn open(name: &str, config: &StoreConfig) -> Result<Self> {
        validate_store_name(name)?;
        config.validate()?;

        let database = &config.database;
        let dialect = database.dialect;
        let pool = ConnectionPool::connect(database)?;
        let statements = dialect.statements(name, database.upsert);

        let store = Self {
            name: name.to_string(),
            statements,
            pool,
            retry: RetryPolicy::new(&config.retry),
            cancel: CancelToken::new(),
            operation_timeout: database.operation_timeout(),
            #[cfg(any(test, feature = "testkit"))]
            faults: faults::Faults::default(),
        };

        store
            .run("open", |session| {
                session.create_table(&store.statements.create_table)
            })
            .map_err(|err| {
                if matches!(err, Error::RetryExhausted { .. } | Error::Connection(_)) {
                    Error::Config(ConfigError::Unreachable(Box::new(err)))
                } else {
                    err
                }
            })?;

        info!(
            store = %store.name,
            dialect = %dialect,
            upsert = if store.statements.upsert.is_native() { "native" } else { "fallback" },
            "Store opened"
        );
        Ok(store)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// The token every operation on this store observes. Cancelling it
    /// aborts in-flight and future operations with [`Error::Cancelled`].
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Pool statistics, or `None` once closed.
    #[must_use]
    pub fn pool_state(&self) -> Option<PoolState> {
        self.pool.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Insert or overwrite `key`.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a bad key; otherwise the error that ended
    /// the retry loop.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(self.dialect(), key)?;

        match &self.statements.upsert {
            UpsertPlan::Native { sql } => self.run("put", |session| {
                session.transaction(&self.statements, |tx| {
                    tx.execute_entry(sql, key, value).map(|_| ())
                })
            }),
            UpsertPlan::Fallback { insert, update } => self.run("put", |session| {
                fallback_upsert(session, &self.statements, insert, update, key, value)
            }),
        }
    }

    /// The value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a bad key; otherwise the error that ended
    /// the retry loop.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entry(key)?.map(|entry| entry.value))
    }

    /// The value and write timestamp stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// As [`Store::get`].
    pub fn entry(&self, key: &str) -> Result<Option<Entry>> {
        validate_key(self.dialect(), key)?;
        let row = self.run("get", |session| {
            session.load_entry(&self.statements.select_entry, key)
        })?;
        Ok(row.map(|row| Entry {
            key: key.to_string(),
            value: row.value,
            updated_at: row.updated_at.and_utc(),
        }))
    }

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// As [`Store::put`].
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(self.dialect(), key)?;
        self.run("delete", |session| {
            session.transaction(&self.statements, |tx| {
                tx.execute_text(&self.statements.delete_key, key)
            })
        })?;
        Ok(())
    }

    /// Whether `key` has a value.
    ///
    /// # Errors
    ///
    /// As [`Store::get`].
    pub fn exists(&self, key: &str) -> Result<bool> {
        validate_key(self.dialect(), key)?;
        let count = self.run("exists", |session| {
            session.load_count(&self.statements.count_key, Some(key))
        })?;
        Ok(count > 0)
    }

    /// Every key, in ascending order, fetched a page at a time.
    ///
    /// The iterator yields an error and stops if a page fetch fails,
    /// including [`Error::Closed`] once the store is closed.
    #[must_use]
    pub fn keys(&self) -> Keys<'_> {
        Keys::new(self)
    }

    pub(crate) fn key_page(&self, after: Option<&str>) -> Result<Vec<String>> {
        let sql = match after {
            Some(_) => &self.statements.next_page,
            None => &self.statements.first_page,
        };
        self.run("keys", |session| session.load_keys(sql, after))
    }

    /// Remove every entry, returning how many were removed.
    ///
    /// # Errors
    ///
    /// The error that ended the retry loop.
    pub fn clear(&self) -> Result<u64> {
        let removed = self.run("clear", |session| {
            session.transaction(&self.statements, |tx| {
                tx.execute_plain(&self.statements.delete_all)
            })
        })?;
        Ok(removed as u64)
    }

    /// Remove `key` and return the value it held.
    ///
    /// # Errors
    ///
    /// As [`Store::put`].
    pub fn pop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(self.dialect(), key)?;
        self.run("pop", |session| {
            session.transaction(&self.statements, |tx| {
                let Some(row) = tx.load_entry(&self.statements.select_entry, key)? else {
                    return Ok(None);
                };
                // A concurrent pop may have removed it after our read.
                let removed = tx.execute_text(&self.statements.delete_key, key)?;
                Ok((removed > 0).then_some(row.value))
            })
        })
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// The error that ended the retry loop.
    pub fn len(&self) -> Result<u64> {
        let count = self.run("len", |session| {
            session.load_count(&self.statements.count_all, None)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// # Errors
    ///
    /// As [`Store::len`].
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every key starting with `prefix`, returning how many were
    /// removed. The match is case-sensitive; an empty prefix matches all.
    ///
    /// # Errors
    ///
    /// As [`Store::put`].
    pub fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        validate_prefix(prefix)?;
        let pattern = self.dialect().prefix_pattern(prefix);
        let removed = self.run("delete_prefix", |session| {
            session.transaction(&self.statements, |tx| {
                tx.execute_text(&self.statements.delete_prefix, &pattern)
            })
        })?;
        Ok(removed as u64)
    }

    /// Round-trip to the database.
    ///
    /// # Errors
    ///
    /// The error that ended the retry loop.
    pub fn ping(&self) -> Result<()> {
        self.run("ping", |session| session.batch(&self.statements.ping))
    }

    /// Single-checkout liveness probe, without retries. `false` once closed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.pool.is_alive(&self.statements.ping)
    }

    /// Cancel in-flight operations and release the pool. Later operations
    /// fail with [`Error::Closed`]. Calling it again does nothing.
    pub fn close(&self) {
        self.cancel.cancel();
        if self.pool.close() {
            info!(store = %self.name, "Store closed");
        }
    }

    /// Make the next `attempts` attempts fail with a transient error after
    /// checking out their session.
    #[cfg(any(test, feature = "testkit"))]
    pub fn inject_transient_failures(&self, attempts: u32) {
        self.faults.arm(attempts);
    }

    /// Run one operation under the retry policy, one session per attempt.
    fn run<T, F>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut(&mut Session) -> Result<T>,
    {
        if self.pool.is_closed() {
            return Err(Error::Closed);
        }
        let cancel = self.cancel.child(self.operation_timeout);

        let result = self.retry.run(&cancel, |_| {
            let mut session = self.pool.acquire(&cancel)?;
            #[cfg(any(test, feature = "testkit"))]
            self.faults.trip()?;
            let result = attempt(&mut session);
            self.pool.release(session);
            result
        });

        if let Err(err) = &result {
            debug!(store = %self.name, operation, error = %err, "Operation failed");
        }
        result
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

/// One fallback-upsert attempt.
///
/// Inserts in one transaction. If the key already exists, a second
/// transaction updates it, inserting again if the row was deleted in
/// between. Only a conflict on that second insert reaches the retry loop,
/// as a transient error.
fn fallback_upsert(
    session: &mut Session,
    statements: &Statements,
    insert: &str,
    update: &str,
    key: &str,
    value: &[u8],
) -> Result<()> {
    match session.transaction(statements, |tx| insert_entry(tx, insert, key, value)) {
        Err(err) if is_key_conflict(&err) => {
            debug!(key, "Key exists, updating");
        }
        other => return other,
    }

    session.transaction(statements, |tx| {
        if tx.execute_value_key(update, value, key)? > 0 {
            return Ok(());
        }
        insert_entry(tx, insert, key, value)
    })
}

fn insert_entry(tx: &mut Session, insert: &str, key: &str, value: &[u8]) -> Result<()> {
    match tx.execute_entry(insert, key, value) {
        Ok(_) => Ok(()),
        Err(Error::Integrity(detail)) => Err(Error::Transient(format!(
            "key conflict during insert: {detail}"
        ))),
        Err(err) => Err(err),
    }
}

fn is_key_conflict(err: &Error) -> bool {
    matches!(err, Error::Transient(detail) if detail.starts_with("key conflict during insert"))
}
