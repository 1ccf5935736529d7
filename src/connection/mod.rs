//! Pooled database connections.
//!
//! One [`ConnectionPool`] owns an r2d2 pool for a single configured
//! database. Connections are opened lazily, validated on checkout and
//! configured by the dialect's session setup when first established.

mod session;

use std::time::Duration;

use diesel::r2d2::{
    ConnectionManager, CustomizeConnection, Error as R2d2Error, Pool, PooledConnection,
    R2D2Connection,
};
use parking_lot::RwLock;
use tracing::{debug, info};

#[cfg(feature = "mysql")]
use diesel::MysqlConnection;
#[cfg(feature = "postgres")]
use diesel::PgConnection;
#[cfg(feature = "sqlite")]
use diesel::SqliteConnection;

pub use session::{EntryRow, KvConnection, Session};

use crate::cancel::CancelToken;
use crate::config::DatabaseConfig;
use crate::dialect::Dialect;
use crate::error::{ConfigError, Error, Result};

#[cfg(not(any(feature = "sqlite", feature = "postgres", feature = "mysql")))]
compile_error!("enable at least one of the `sqlite`, `postgres` or `mysql` features");

type Manager<C> = ConnectionManager<C>;

#[derive(Clone)]
enum DbPool {
    #[cfg(feature = "sqlite")]
    Sqlite(Pool<Manager<SqliteConnection>>),
    #[cfg(feature = "postgres")]
    Postgres(Pool<Manager<PgConnection>>),
    #[cfg(feature = "mysql")]
    Mysql(Pool<Manager<MysqlConnection>>),
}

pub(crate) enum PooledSession {
    #[cfg(feature = "sqlite")]
    Sqlite(PooledConnection<Manager<SqliteConnection>>),
    #[cfg(feature = "postgres")]
    Postgres(PooledConnection<Manager<PgConnection>>),
    #[cfg(feature = "mysql")]
    Mysql(PooledConnection<Manager<MysqlConnection>>),
}

/// Runs the dialect's session statements on every new connection.
#[derive(Debug)]
struct SessionSetup {
    statements: Vec<String>,
}

impl<C> CustomizeConnection<C, R2d2Error> for SessionSetup
where
    C: KvConnection + 'static,
{
    fn on_acquire(&self, conn: &mut C) -> std::result::Result<(), R2d2Error> {
        for sql in &self.statements {
            conn.batch(sql).map_err(R2d2Error::QueryError)?;
        }
        Ok(())
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Connection pool for one database.
pub struct ConnectionPool {
    dialect: Dialect,
    checkout_timeout: Duration,
    pool: RwLock<Option<DbPool>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("dialect", &self.dialect)
            .field("checkout_timeout", &self.checkout_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool for `config`. No connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedDialect`] if no driver for the
    /// dialect is compiled in, or [`ConfigError::InvalidValue`] if the
    /// target does not form a valid connection string.
    pub fn connect(config: &DatabaseConfig) -> std::result::Result<Self, ConfigError> {
        let dialect = config.dialect;
        let url = config.connection_url()?;
        let setup = SessionSetup {
            statements: dialect.session_setup(config.connection_timeout(), !config.is_memory()),
        };

        let pool = match dialect {
            #[cfg(feature = "sqlite")]
            Dialect::Sqlite => DbPool::Sqlite(build_pool(url, config, setup)),
            #[cfg(feature = "postgres")]
            Dialect::Postgres => DbPool::Postgres(build_pool(url, config, setup)),
            #[cfg(feature = "mysql")]
            Dialect::Mysql => DbPool::Mysql(build_pool(url, config, setup)),
            #[allow(unreachable_patterns)]
            other => return Err(unsupported(other)),
        };

        info!(
            dialect = %dialect,
            pool_size = if config.is_memory() { 1 } else { config.pool_size },
            "Connection pool created"
        );

        Ok(Self {
            dialect,
            checkout_timeout: config.connection_timeout(),
            pool: RwLock::new(Some(pool)),
        })
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Check out a session.
    ///
    /// Blocks while the pool is exhausted, for at most the configured
    /// connection timeout and never past `cancel`'s deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] after [`ConnectionPool::close`]
    /// - [`Error::Cancelled`] if `cancel` fires first
    /// - [`Error::Connection`] if no connection became available
    pub fn acquire(&self, cancel: &CancelToken) -> Result<Session> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let pool = self.pool.read().clone().ok_or(Error::Closed)?;
        let wait = cancel.bound(self.checkout_timeout);

        let checkout = match &pool {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => pool.get_timeout(wait).map(PooledSession::Sqlite),
            #[cfg(feature = "postgres")]
            DbPool::Postgres(pool) => pool.get_timeout(wait).map(PooledSession::Postgres),
            #[cfg(feature = "mysql")]
            DbPool::Mysql(pool) => pool.get_timeout(wait).map(PooledSession::Mysql),
        };

        match checkout {
            Ok(conn) => Ok(Session::new(self.dialect, conn)),
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(err) => {
                debug!(dialect = %self.dialect, error = %err, "Connection checkout failed");
                Err(Error::Connection(format!("{}: {err}", self.dialect)))
            }
        }
    }

    /// Return a session to the pool.
    pub fn release(&self, session: Session) {
        drop(session);
    }

    /// Liveness probe: check out a session and run the ping statement.
    #[must_use]
    pub fn is_alive(&self, ping: &str) -> bool {
        let cancel = CancelToken::new();
        match self.acquire(&cancel) {
            Ok(mut session) => session.batch(ping).is_ok(),
            Err(_) => false,
        }
    }

    /// Pool statistics, or `None` once closed.
    #[must_use]
    pub fn state(&self) -> Option<PoolState> {
        let guard = self.pool.read();
        let state = match guard.as_ref()? {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => pool.state(),
            #[cfg(feature = "postgres")]
            DbPool::Postgres(pool) => pool.state(),
            #[cfg(feature = "mysql")]
            DbPool::Mysql(pool) => pool.state(),
        };
        Some(PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.read().is_none()
    }

    /// Drop the pool. Sessions already checked out stay usable until
    /// released. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self.pool.write().take().is_some();
        if closed {
            info!(dialect = %self.dialect, "Connection pool closed");
        }
        closed
    }
}

fn build_pool<C>(url: String, config: &DatabaseConfig, setup: SessionSetup) -> Pool<Manager<C>>
where
    C: R2D2Connection + KvConnection + 'static,
{
    let builder = Pool::builder()
        .connection_timeout(config.connection_timeout())
        .test_on_check_out(true)
        .connection_customizer(Box::new(setup));

    let builder = if config.is_memory() {
        // Each connection to an in-memory database is a separate database.
        builder
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        builder.max_size(config.pool_size).min_idle(Some(0))
    };

    builder.build_unchecked(Manager::new(url))
}

fn unsupported(dialect: Dialect) -> ConfigError {
    let reason = match dialect {
        Dialect::Oracle | Dialect::Sqlserver => "no driver is available for this engine".to_string(),
        other => format!("built without the `{other}` feature"),
    };
    ConfigError::UnsupportedDialect { dialect, reason }
}
