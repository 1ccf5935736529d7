//! A checked-out connection and the statement shapes the store runs on it.

use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Binary, Text, Timestamp};
use tracing::debug;

#[cfg(feature = "mysql")]
use diesel::MysqlConnection;
#[cfg(feature = "postgres")]
use diesel::PgConnection;
#[cfg(feature = "sqlite")]
use diesel::SqliteConnection;

use crate::dialect::{Dialect, DriverFailure, ErrorClass, Statements};
use crate::error::Result;

use super::PooledSession;

/// One row of `select_entry`.
#[derive(Debug, QueryableByName)]
pub struct EntryRow {
    #[diesel(sql_type = Binary)]
    pub value: Vec<u8>,
    #[diesel(sql_type = Timestamp)]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, QueryableByName)]
struct KeyRow {
    #[diesel(sql_type = Text)]
    key: String,
}

#[derive(Debug, QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// Statement shapes needed by the store, implemented once per driver.
///
/// Object safe so a [`Session`] can hand out `&mut dyn KvConnection`
/// regardless of which backend the pool was built for.
pub trait KvConnection: Send {
    /// Run statements without binds or results.
    fn batch(&mut self, sql: &str) -> QueryResult<()>;

    /// Run a statement with no binds, returning affected rows.
    fn execute_plain(&mut self, sql: &str) -> QueryResult<usize>;

    /// Run a statement binding one text value.
    fn execute_text(&mut self, sql: &str, text: &str) -> QueryResult<usize>;

    /// Run a statement binding `(key, value)`.
    fn execute_entry(&mut self, sql: &str, key: &str, value: &[u8]) -> QueryResult<usize>;

    /// Run a statement binding `(value, key)`.
    fn execute_value_key(&mut self, sql: &str, value: &[u8], key: &str) -> QueryResult<usize>;

    fn load_entry(&mut self, sql: &str, key: &str) -> QueryResult<Option<EntryRow>>;

    /// Load a page of keys, binding the previous page's last key if any.
    fn load_keys(&mut self, sql: &str, after: Option<&str>) -> QueryResult<Vec<String>>;

    /// Load a `count` column, binding `key` if given.
    fn load_count(&mut self, sql: &str, key: Option<&str>) -> QueryResult<i64>;
}

macro_rules! impl_kv_connection {
    ($conn:ty) => {
        impl KvConnection for $conn {
            fn batch(&mut self, sql: &str) -> QueryResult<()> {
                self.batch_execute(sql)
            }

            fn execute_plain(&mut self, sql: &str) -> QueryResult<usize> {
                sql_query(sql).execute(self)
            }

            fn execute_text(&mut self, sql: &str, text: &str) -> QueryResult<usize> {
                sql_query(sql).bind::<Text, _>(text).execute(self)
            }

            fn execute_entry(&mut self, sql: &str, key: &str, value: &[u8]) -> QueryResult<usize> {
                sql_query(sql)
                    .bind::<Text, _>(key)
                    .bind::<Binary, _>(value)
                    .execute(self)
            }

            fn execute_value_key(
                &mut self,
                sql: &str,
                value: &[u8],
                key: &str,
            ) -> QueryResult<usize> {
                sql_query(sql)
                    .bind::<Binary, _>(value)
                    .bind::<Text, _>(key)
                    .execute(self)
            }

            fn load_entry(&mut self, sql: &str, key: &str) -> QueryResult<Option<EntryRow>> {
                sql_query(sql)
                    .bind::<Text, _>(key)
                    .get_result::<EntryRow>(self)
                    .optional()
            }

            fn load_keys(&mut self, sql: &str, after: Option<&str>) -> QueryResult<Vec<String>> {
                let rows: Vec<KeyRow> = match after {
                    Some(after) => sql_query(sql).bind::<Text, _>(after).load(self)?,
                    None => sql_query(sql).load(self)?,
                };
                Ok(rows.into_iter().map(|row| row.key).collect())
            }

            fn load_count(&mut self, sql: &str, key: Option<&str>) -> QueryResult<i64> {
                let row: CountRow = match key {
                    Some(key) => sql_query(sql).bind::<Text, _>(key).get_result(self)?,
                    None => sql_query(sql).get_result(self)?,
                };
                Ok(row.count)
            }
        }
    };
}

#[cfg(feature = "sqlite")]
impl_kv_connection!(SqliteConnection);
#[cfg(feature = "postgres")]
impl_kv_connection!(PgConnection);
#[cfg(feature = "mysql")]
impl_kv_connection!(MysqlConnection);

/// A pooled connection bound to its dialect.
///
/// Every method translates driver errors through [`Dialect::translate`], so
/// callers only ever see [`crate::Error`]. Dropping the session returns the
/// connection to its pool.
pub struct Session {
    dialect: Dialect,
    conn: PooledSession,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(super) fn new(dialect: Dialect, conn: PooledSession) -> Self {
        Self { dialect, conn }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn conn(&mut self) -> &mut dyn KvConnection {
        match &mut self.conn {
            #[cfg(feature = "sqlite")]
            PooledSession::Sqlite(conn) => &mut **conn,
            #[cfg(feature = "postgres")]
            PooledSession::Postgres(conn) => &mut **conn,
            #[cfg(feature = "mysql")]
            PooledSession::Mysql(conn) => &mut **conn,
        }
    }

    fn translate<T>(&self, result: QueryResult<T>) -> Result<T> {
        result.map_err(|err: DieselError| self.dialect.translate(&err))
    }

    /// Run statements that take no binds.
    ///
    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn batch(&mut self, sql: &str) -> Result<()> {
        let result = self.conn().batch(sql);
        self.translate(result)
    }

    /// Run an idempotent `CREATE TABLE`.
    ///
    /// A concurrent creator winning the race is success.
    ///
    /// # Errors
    ///
    /// Returns the translated driver error for any other failure.
    pub fn create_table(&mut self, sql: &str) -> Result<()> {
        let dialect = self.dialect;
        match self.conn().batch(sql) {
            Ok(()) => Ok(()),
            Err(err) => {
                let failure = DriverFailure::from(&err);
                if dialect.classify(&failure) == ErrorClass::AlreadyExists {
                    debug!(dialect = %dialect, "Table created concurrently");
                    Ok(())
                } else {
                    Err(dialect.translate_failure(&failure))
                }
            }
        }
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn execute_plain(&mut self, sql: &str) -> Result<usize> {
        let result = self.conn().execute_plain(sql);
        self.translate(result)
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn execute_text(&mut self, sql: &str, text: &str) -> Result<usize> {
        let result = self.conn().execute_text(sql, text);
        self.translate(result)
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn execute_entry(&mut self, sql: &str, key: &str, value: &[u8]) -> Result<usize> {
        let result = self.conn().execute_entry(sql, key, value);
        self.translate(result)
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn execute_value_key(&mut self, sql: &str, value: &[u8], key: &str) -> Result<usize> {
        let result = self.conn().execute_value_key(sql, value, key);
        self.translate(result)
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn load_entry(&mut self, sql: &str, key: &str) -> Result<Option<EntryRow>> {
        let result = self.conn().load_entry(sql, key);
        self.translate(result)
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn load_keys(&mut self, sql: &str, after: Option<&str>) -> Result<Vec<String>> {
        let result = self.conn().load_keys(sql, after);
        self.translate(result)
    }

    /// # Errors
    ///
    /// Returns the translated driver error.
    pub fn load_count(&mut self, sql: &str, key: Option<&str>) -> Result<i64> {
        let result = self.conn().load_count(sql, key);
        self.translate(result)
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds. Rolls back when `f` fails, when the commit
    /// fails, or when `f` panics.
    ///
    /// # Errors
    ///
    /// Returns the error from `begin`, `f`, or `commit`.
    pub fn transaction<T, F>(&mut self, statements: &Statements, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        if let Some(begin) = &statements.begin {
            self.batch(begin)?;
        }

        let mut guard = RollbackGuard {
            session: self,
            rollback: &statements.rollback,
            armed: true,
        };
        let value = f(&mut *guard.session)?;
        guard.session.batch(&statements.commit)?;
        guard.armed = false;
        Ok(value)
    }
}

struct RollbackGuard<'a> {
    session: &'a mut Session,
    rollback: &'a str,
    armed: bool,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.session.batch(self.rollback) {
            // The pool's checkout test discards the connection if it is gone.
            debug!(error = %err, "Rollback failed");
        }
    }
}
