//! Error kinds surfaced by every cache operation

use std::error::Error as StdError;

/// Result alias used throughout the cache
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors returned to cache consumers
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Key is absent or its TTL has lapsed
    #[error("key not found")]
    KeyNotFound,

    /// Operation does not fit the structure stored under the key
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Opaque storage-engine failure (I/O, corruption, transaction, closed handle)
    #[error("storage engine error: {0}")]
    Engine(#[source] Box<dyn StdError + Send + Sync>),

    /// Cancellation token was already triggered when the call was made
    #[error("operation cancelled before dispatch")]
    Cancelled,

    /// Construction-time configuration problem
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Build an engine error from a plain message
    pub fn engine(message: impl Into<String>) -> Self {
        CacheError::Engine(message.into().into())
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        CacheError::TypeMismatch(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::KeyNotFound)
    }
}

macro_rules! engine_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CacheError {
                fn from(err: $ty) -> Self {
                    CacheError::Engine(Box::new(err))
                }
            }
        )*
    };
}

engine_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    std::io::Error,
);

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        // Stored bytes that no longer parse are corruption, not a caller mistake
        CacheError::Engine(Box::new(err))
    }
}

/// Failure of one compaction run
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    /// Copy into the fresh file failed; the original file is untouched
    #[error("compaction copy failed: {0}")]
    Copy(#[source] CacheError),

    /// Fresh file could not replace the original; the original was reopened
    #[error("compaction rename failed: {0}")]
    Rename(#[source] std::io::Error),

    /// Original was replaced but could not be reopened; the store is unusable
    #[error("reopening compacted database failed: {0}")]
    Reopen(#[source] CacheError),

    /// Cancellation token was already triggered; nothing was touched
    #[error("compaction cancelled before it started")]
    Cancelled,
}

impl CompactionError {
    /// Whether the store is left without a usable handle
    pub fn is_fatal(&self) -> bool {
        matches!(self, CompactionError::Reopen(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_message() {
        let err = CacheError::engine("storage unavailable");
        assert_eq!(err.to_string(), "storage engine error: storage unavailable");
    }

    #[test]
    fn test_compaction_fatality() {
        let copy = CompactionError::Copy(CacheError::engine("disk full"));
        let reopen = CompactionError::Reopen(CacheError::engine("locked"));
        assert!(!copy.is_fatal());
        assert!(reopen.is_fatal());
        assert!(!CompactionError::Cancelled.is_fatal());
    }

    #[test]
    fn test_not_found_helper() {
        assert!(CacheError::KeyNotFound.is_not_found());
        assert!(!CacheError::Cancelled.is_not_found());
    }
}
