//! Error taxonomy shared by every layer of the store.
//!
//! Lower layers only classify and propagate; the retry controller is the one
//! place that looks at [`Error::kind`] to decide whether another attempt is
//! worth making.

use thiserror::Error;

use crate::dialect::Dialect;

/// Retry-relevant classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected to succeed on a later attempt (deadlock, dropped connection).
    Transient,
    /// Constraint violation that retrying will not resolve.
    Integrity,
    /// Anything else: surfaced immediately.
    Fatal,
}

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("unknown dialect '{0}'")]
    UnknownDialect(String),

    #[error("dialect {dialect} is not supported by this build: {reason}")]
    UnsupportedDialect { dialect: Dialect, reason: String },

    #[error("database unreachable: {0}")]
    Unreachable(#[source] Box<Error>),
}

/// Caller input rejected before touching the database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("key is {len} characters long, {dialect} allows at most {max}")]
    KeyTooLong {
        len: usize,
        max: usize,
        dialect: Dialect,
    },

    #[error("key must not contain NUL characters")]
    NulInKey,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store is closed")]
    Closed,

    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

impl Error {
    /// Classify this error for the retry controller.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) | Error::Transient(_) => ErrorKind::Transient,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Config(_)
            | Error::Validation(_)
            | Error::Database(_)
            | Error::Cancelled
            | Error::Closed
            | Error::RetryExhausted { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns true for caller-initiated aborts.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_transient_are_retryable() {
        assert!(Error::Connection("pool timed out".into()).is_transient());
        assert!(Error::Transient("deadlock".into()).is_transient());
    }

    #[test]
    fn integrity_is_not_transient() {
        let err = Error::Integrity("duplicate".into());
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!err.is_transient());
    }

    #[test]
    fn terminal_variants_are_fatal() {
        let exhausted = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::Transient("locked".into())),
        };
        for err in [
            Error::Cancelled,
            Error::Closed,
            Error::Database("syntax error".into()),
            Error::Validation(ValidationError::EmptyKey),
            exhausted,
        ] {
            assert_eq!(err.kind(), ErrorKind::Fatal, "{err}");
        }
    }

    #[test]
    fn retry_exhausted_message_includes_last_error() {
        let err = Error::RetryExhausted {
            attempts: 5,
            last: Box::new(Error::Transient("database is locked".into())),
        };
        let text = err.to_string();
        assert!(text.contains("5 attempts"));
        assert!(text.contains("database is locked"));
    }

    #[test]
    fn key_too_long_names_dialect() {
        let err = ValidationError::KeyTooLong {
            len: 300,
            max: 255,
            dialect: Dialect::Mysql,
        };
        assert_eq!(
            err.to_string(),
            "key is 300 characters long, mysql allows at most 255"
        );
    }
}
