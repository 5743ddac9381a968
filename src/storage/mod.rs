//! Generic durable key-value storage.
//!
//! Services depend on the [`Storage`] trait only. The SQLite engine in
//! [`sqlite`] is entity-agnostic: table layout, statements and row mapping
//! come from a per-entity [`StorageProcessor`].

use async_trait::async_trait;
use thiserror::Error;

mod processor;
mod sqlite;

pub use processor::{Statement, StorageProcessor};
pub use sqlite::{open_connection, SharedConnection, SqliteStorage};

/// Storage errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No record exists for the requested key
    #[error("record not found")]
    NotFound,

    /// Connection-level failure; callers may retry with backoff
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Statement failed (constraint, schema or mapping error)
    #[error("storage query failed: {0}")]
    Query(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound,
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase => StorageError::Unavailable(err.to_string()),
                _ => StorageError::Query(err.to_string()),
            },
            _ => StorageError::Query(err.to_string()),
        }
    }
}

/// Durable storage of one value per key.
///
/// Every operation is transactional: it either fully commits or leaves the
/// stored state untouched.
#[async_trait]
pub trait Storage<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send,
{
    /// Reads the value for `key`, failing with [`StorageError::NotFound`] if absent.
    async fn find(&self, key: &K) -> Result<V, StorageError>;

    /// Upserts the value for `key`, fully replacing any existing record.
    async fn insert(&self, key: &K, value: V) -> Result<V, StorageError>;

    /// Replaces an existing record, failing with [`StorageError::NotFound`]
    /// when there is nothing to update.
    async fn update(&self, key: &K, value: V) -> Result<V, StorageError>;

    /// Deletes the record, failing with [`StorageError::NotFound`] if absent.
    async fn delete(&self, key: &K) -> Result<(), StorageError>;
}
