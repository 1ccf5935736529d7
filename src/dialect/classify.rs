//! Translation of driver failures into the shared taxonomy.
//!
//! Diesel normalises a handful of failure kinds across backends; everything
//! else arrives as an opaque message. Engines that report numeric codes in
//! their messages (Oracle's `ORA-nnnnn`, SQL Server's message numbers) are
//! matched on those codes.

use diesel::result::{DatabaseErrorKind, Error as DieselError};

use super::Dialect;
use crate::error::Error;

/// Driver-neutral view of a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    SerializationFailure,
    ReadOnlyTransaction,
    ClosedConnection,
    UnableToSendCommand,
    /// The connection's transaction bookkeeping is unusable.
    BrokenTransaction,
    /// A database error diesel has no dedicated kind for.
    Other,
    /// A client-side failure (decoding a row, building a query).
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverFailure {
    pub kind: FailureKind,
    pub message: String,
    pub constraint: Option<String>,
}

/// What the dialect makes of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Integrity,
    /// The object being created is already there.
    AlreadyExists,
    Fatal,
}

impl DriverFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            constraint: None,
        }
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    fn is_connection_loss(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::ClosedConnection | FailureKind::UnableToSendCommand
        )
    }
}

impl From<&DieselError> for DriverFailure {
    fn from(err: &DieselError) -> Self {
        match err {
            DieselError::DatabaseError(kind, info) => {
                let kind = match kind {
                    DatabaseErrorKind::UniqueViolation => FailureKind::UniqueViolation,
                    DatabaseErrorKind::ForeignKeyViolation => FailureKind::ForeignKeyViolation,
                    DatabaseErrorKind::NotNullViolation => FailureKind::NotNullViolation,
                    DatabaseErrorKind::CheckViolation => FailureKind::CheckViolation,
                    DatabaseErrorKind::SerializationFailure => FailureKind::SerializationFailure,
                    DatabaseErrorKind::ReadOnlyTransaction => FailureKind::ReadOnlyTransaction,
                    DatabaseErrorKind::ClosedConnection => FailureKind::ClosedConnection,
                    DatabaseErrorKind::UnableToSendCommand => FailureKind::UnableToSendCommand,
                    _ => FailureKind::Other,
                };
                Self {
                    kind,
                    message: info.message().to_string(),
                    constraint: info.constraint_name().map(str::to_string),
                }
            }
            DieselError::BrokenTransactionManager => {
                Self::new(FailureKind::BrokenTransaction, err.to_string())
            }
            DieselError::RollbackErrorOnCommit { commit_error, .. } => {
                Self::from(commit_error.as_ref())
            }
            other => Self::new(FailureKind::Client, other.to_string()),
        }
    }
}

pub(super) fn classify(dialect: Dialect, failure: &DriverFailure) -> ErrorClass {
    match failure.kind {
        FailureKind::ClosedConnection
        | FailureKind::UnableToSendCommand
        | FailureKind::SerializationFailure
        | FailureKind::BrokenTransaction => ErrorClass::Transient,
        FailureKind::UniqueViolation if is_catalog_race(dialect, failure) => {
            ErrorClass::AlreadyExists
        }
        FailureKind::UniqueViolation
        | FailureKind::ForeignKeyViolation
        | FailureKind::NotNullViolation
        | FailureKind::CheckViolation => ErrorClass::Integrity,
        FailureKind::ReadOnlyTransaction | FailureKind::Client => ErrorClass::Fatal,
        FailureKind::Other => match dialect {
            Dialect::Sqlite => classify_sqlite(&failure.message),
            Dialect::Postgres => classify_postgres(&failure.message),
            Dialect::Mysql => classify_mysql(&failure.message),
            Dialect::Oracle => classify_oracle(&failure.message),
            Dialect::Sqlserver => classify_sqlserver(&failure.message),
        },
    }
}

/// Postgres reports two racing `CREATE TABLE IF NOT EXISTS` as a unique
/// violation on its type catalog.
fn is_catalog_race(dialect: Dialect, failure: &DriverFailure) -> bool {
    dialect == Dialect::Postgres
        && failure
            .constraint
            .as_deref()
            .is_some_and(|c| c == "pg_type_typname_nsp_index")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn classify_sqlite(message: &str) -> ErrorClass {
    let m = message.to_ascii_lowercase();
    if contains_any(
        &m,
        &[
            "database is locked",
            "database table is locked",
            "database schema has changed",
            "busy",
        ],
    ) {
        ErrorClass::Transient
    } else if m.contains("already exists") {
        ErrorClass::AlreadyExists
    } else if m.contains("constraint failed") {
        ErrorClass::Integrity
    } else {
        ErrorClass::Fatal
    }
}

fn classify_postgres(message: &str) -> ErrorClass {
    let m = message.to_ascii_lowercase();
    if contains_any(
        &m,
        &[
            "deadlock detected",
            "could not serialize access",
            "canceling statement due to lock timeout",
            "could not obtain lock",
            "terminating connection",
            "server closed the connection",
            "connection reset",
            "the database system is starting up",
            "the database system is shutting down",
        ],
    ) {
        ErrorClass::Transient
    } else if m.contains("already exists") {
        ErrorClass::AlreadyExists
    } else {
        ErrorClass::Fatal
    }
}

fn classify_mysql(message: &str) -> ErrorClass {
    let m = message.to_ascii_lowercase();
    if contains_any(
        &m,
        &[
            "deadlock found",
            "lock wait timeout exceeded",
            "try restarting transaction",
            "server has gone away",
            "lost connection to",
            "too many connections",
        ],
    ) {
        ErrorClass::Transient
    } else if m.contains("already exists") {
        ErrorClass::AlreadyExists
    } else if m.contains("duplicate entry") {
        ErrorClass::Integrity
    } else {
        ErrorClass::Fatal
    }
}

/// Every `ORA-nnnnn` code in an Oracle message, in order.
fn oracle_codes(message: &str) -> Vec<u32> {
    message
        .match_indices("ORA-")
        .filter_map(|(at, _)| {
            let digits: String = message[at + 4..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        })
        .collect()
}

fn classify_oracle(message: &str) -> ErrorClass {
    for code in oracle_codes(message) {
        let class = match code {
            // deadlock, can't serialize, resource busy, end-of-file on
            // channel, not connected, lost contact, no listener, timeout
            60 | 8177 | 54 | 3113 | 3114 | 3135 | 12541 | 12170 | 12514 | 12528 => {
                Some(ErrorClass::Transient)
            }
            // name is already used by an existing object
            955 => Some(ErrorClass::AlreadyExists),
            // unique, not null, check, parent key not found, child record found
            1 | 1400 | 2290 | 2291 | 2292 => Some(ErrorClass::Integrity),
            _ => None,
        };
        if let Some(class) = class {
            return class;
        }
    }
    ErrorClass::Fatal
}

fn classify_sqlserver(message: &str) -> ErrorClass {
    let m = message.to_ascii_lowercase();
    if contains_any(
        &m,
        &[
            "chosen as the deadlock victim",
            "lock request time out period exceeded",
            "forcibly closed by the remote host",
            "the service is currently busy",
            "connection is broken",
            "transport-level error",
        ],
    ) {
        ErrorClass::Transient
    } else if m.contains("there is already an object named") {
        ErrorClass::AlreadyExists
    } else if contains_any(
        &m,
        &[
            "violation of primary key constraint",
            "violation of unique key constraint",
            "cannot insert duplicate key",
            "cannot insert the value null",
            "conflicted with the",
        ],
    ) {
        ErrorClass::Integrity
    } else {
        ErrorClass::Fatal
    }
}

impl Dialect {
    /// Translate a driver error into the taxonomy.
    ///
    /// `AlreadyExists` only means something to table creation, which checks
    /// [`Dialect::classify`] first; anywhere else it is fatal.
    #[must_use]
    pub fn translate(self, err: &DieselError) -> Error {
        self.translate_failure(&DriverFailure::from(err))
    }

    #[must_use]
    pub fn translate_failure(self, failure: &DriverFailure) -> Error {
        let detail = format!("{self}: {}", failure.message);
        match self.classify(failure) {
            ErrorClass::Transient if failure.is_connection_loss() => Error::Connection(detail),
            ErrorClass::Transient => Error::Transient(detail),
            ErrorClass::Integrity => Error::Integrity(detail),
            ErrorClass::AlreadyExists | ErrorClass::Fatal => Error::Database(detail),
        }
    }
}
