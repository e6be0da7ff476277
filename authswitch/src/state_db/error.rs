//! State database error types.

use std::path::PathBuf;

use field_codec::CodecError;
use thiserror::Error;

/// SQLite primary result codes that mean another connection holds the lock.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Errors that can occur while reading or patching the host's state database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The host's state database is not present on this machine.
    #[error("state database not found")]
    NotFound,

    /// The record this tool patches has never been written by the host.
    #[error("key not found in state database: {0}")]
    KeyNotFound(String),

    /// Copying the database aside failed; nothing was modified.
    #[error("failed to back up {}: {source}", path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the database lock, or the write did not finish in time.
    #[error("state database is locked by another process")]
    StoreLocked,

    /// The stored record is not valid base64.
    #[error("stored record is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The stored value is not UTF-8 text.
    #[error("stored value for {0} is not UTF-8 text")]
    InvalidValue(String),

    /// The decoded record could not be walked or rebuilt.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Any other SQLite failure.
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this failure means "the host is holding the database".
    ///
    /// This is the one failure the switch flow recovers from by journaling
    /// the switch instead of surfacing an error.
    #[inline]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::StoreLocked)
    }
}

fn is_lock_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xFF, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let locked = db.code().is_some_and(|code| is_lock_code(&code))
                    || db.message().contains("database is locked");
                if locked {
                    return Self::StoreLocked;
                }
            }
            sqlx::Error::PoolTimedOut => return Self::StoreLocked,
            _ => {}
        }
        Self::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_codes() {
        assert!(is_lock_code("5"));
        assert!(is_lock_code("6"));
        // SQLITE_BUSY_SNAPSHOT and SQLITE_LOCKED_SHAREDCACHE
        assert!(is_lock_code("517"));
        assert!(is_lock_code("262"));
        assert!(!is_lock_code("8"));
        assert!(!is_lock_code("14"));
        assert!(!is_lock_code("not a code"));
    }

    #[test]
    fn test_pool_timeout_is_locked() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_locked());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_locked());
    }
}
