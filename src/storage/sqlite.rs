//! SQLite storage engine.
//!
//! Operations run on the blocking pool, each inside its own transaction.
//! A transaction that is not committed is rolled back when dropped, so an
//! error part-way through an operation never leaves a partial write.

use super::{Statement, Storage, StorageError, StorageProcessor};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Transaction};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Connection shared by every storage opened on the same database.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Opens (or creates) a SQLite database.
///
/// `":memory:"` opens a private in-memory database, which is what the tests use.
pub fn open_connection<P: AsRef<Path>>(path: P) -> Result<SharedConnection, StorageError> {
    let conn = Connection::open(path.as_ref()).map_err(|e| {
        StorageError::Unavailable(format!(
            "failed to open database at {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// Generic [`Storage`] over SQLite, parameterised by an entity processor.
pub struct SqliteStorage<K, V, P> {
    conn: SharedConnection,
    processor: Arc<P>,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, P> SqliteStorage<K, V, P>
where
    K: Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
    P: StorageProcessor<K, V>,
{
    /// Creates the storage and ensures the entity's table exists.
    pub fn new(conn: SharedConnection, processor: P) -> Result<Self, StorageError> {
        {
            let guard = conn.lock().map_err(|_| poisoned())?;
            guard.execute_batch(processor.schema()).map_err(|e| {
                error!(table = processor.table_name(), error = %e, "Failed to create table");
                StorageError::from(e)
            })?;
        }

        debug!(table = processor.table_name(), "Storage initialized");

        Ok(Self {
            conn,
            processor: Arc::new(processor),
            _marker: PhantomData,
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &P) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let processor = Arc::clone(&self.processor);

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| poisoned())?;
            op(&mut *guard, &*processor)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {}", e)))?
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("database connection lock poisoned".to_string())
}

fn execute(tx: &Transaction<'_>, statement: &Statement) -> Result<usize, StorageError> {
    let mut prepared = tx.prepare_cached(statement.sql)?;
    Ok(prepared.execute(params_from_iter(statement.params.iter()))?)
}

#[async_trait]
impl<K, V, P> Storage<K, V> for SqliteStorage<K, V, P>
where
    K: Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
    P: StorageProcessor<K, V>,
{
    async fn find(&self, key: &K) -> Result<V, StorageError> {
        let key = key.clone();

        self.run(move |conn, processor| {
            debug!(table = processor.table_name(), key = ?key, "Finding record");

            let tx = conn.transaction()?;
            let statement = processor.select(&key);
            let value = {
                let mut prepared = tx.prepare_cached(statement.sql)?;
                prepared.query_row(params_from_iter(statement.params.iter()), |row| {
                    processor.scan(&key, row)
                })
            };

            match value {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    debug!(table = processor.table_name(), key = ?key, "No record found");
                    Err(StorageError::NotFound)
                }
                Err(e) => {
                    error!(table = processor.table_name(), key = ?key, error = %e, "Error reading record");
                    Err(e.into())
                }
            }
        })
        .await
    }

    async fn insert(&self, key: &K, value: V) -> Result<V, StorageError> {
        let key = key.clone();

        self.run(move |conn, processor| {
            debug!(table = processor.table_name(), key = ?key, "Upserting record");

            let tx = conn.transaction()?;
            execute(&tx, &processor.insert(&key, &value)).map_err(|e| {
                error!(table = processor.table_name(), key = ?key, error = %e, "Error inserting record");
                e
            })?;
            tx.commit()?;

            Ok(value)
        })
        .await
    }

    async fn update(&self, key: &K, value: V) -> Result<V, StorageError> {
        let key = key.clone();

        self.run(move |conn, processor| {
            debug!(table = processor.table_name(), key = ?key, "Updating record");

            let tx = conn.transaction()?;
            let rows = execute(&tx, &processor.update(&key, &value)).map_err(|e| {
                error!(table = processor.table_name(), key = ?key, error = %e, "Error updating record");
                e
            })?;

            if rows == 0 {
                debug!(table = processor.table_name(), key = ?key, "No record found to update");
                return Err(StorageError::NotFound);
            }

            tx.commit()?;
            Ok(value)
        })
        .await
    }

    async fn delete(&self, key: &K) -> Result<(), StorageError> {
        let key = key.clone();

        self.run(move |conn, processor| {
            debug!(table = processor.table_name(), key = ?key, "Deleting record");

            let tx = conn.transaction()?;
            let rows = execute(&tx, &processor.delete(&key))?;

            if rows == 0 {
                debug!(table = processor.table_name(), key = ?key, "No record found to delete");
                return Err(StorageError::NotFound);
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }
}
