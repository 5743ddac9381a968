use rusqlite::types::Value;
use rusqlite::Row;

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: &'static str,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: &'static str, params: Vec<Value>) -> Self {
        Self { sql, params }
    }
}

/// Entity-specific query building for [`super::SqliteStorage`].
///
/// Keeps table layout and SQL outside the generic engine. `insert` must have
/// upsert semantics (`ON CONFLICT ... DO UPDATE`); `update` and `delete` must
/// affect zero rows when the key is absent.
pub trait StorageProcessor<K, V>: Send + Sync + 'static {
    fn table_name(&self) -> &'static str;

    /// `CREATE TABLE IF NOT EXISTS ...` batch run when the storage is opened
    fn schema(&self) -> &'static str;

    fn select(&self, key: &K) -> Statement;

    /// Maps a row returned by [`StorageProcessor::select`] into a value
    fn scan(&self, key: &K, row: &Row<'_>) -> rusqlite::Result<V>;

    fn insert(&self, key: &K, value: &V) -> Statement;

    fn update(&self, key: &K, value: &V) -> Statement;

    fn delete(&self, key: &K) -> Statement;
}
