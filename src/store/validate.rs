//! Key checks applied before any statement is built.

use crate::dialect::Dialect;
use crate::error::ValidationError;

/// Check `key` against the rules shared by every operation.
///
/// Length is counted in characters, matching how the engines size their
/// text columns.
pub(crate) fn validate_key(dialect: Dialect, key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if key.contains('\0') {
        return Err(ValidationError::NulInKey);
    }
    let max = dialect.max_key_len();
    // Byte length bounds character length from above.
    if key.len() > max {
        let len = key.chars().count();
        if len > max {
            return Err(ValidationError::KeyTooLong { len, max, dialect });
        }
    }
    Ok(())
}

/// Prefixes may be empty but must not contain NUL.
pub(crate) fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.contains('\0') {
        return Err(ValidationError::NulInKey);
    }
    Ok(())
}
