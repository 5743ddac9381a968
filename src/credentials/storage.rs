//! `authentications` table layout and statements.

use super::{AuthKey, StoredAuthentication};
use crate::storage::{Statement, StorageProcessor};
use rusqlite::types::Value;
use rusqlite::Row;

/// Query building for [`StoredAuthentication`] records.
///
/// # Schema
/// ```sql
/// CREATE TABLE authentications (
///     team_id       TEXT NOT NULL,
///     user_id       TEXT NOT NULL,
///     token_type    TEXT NOT NULL,
///     access_token  TEXT NOT NULL,    -- Encrypted
///     refresh_token TEXT NOT NULL,    -- Encrypted
///     expires_at    INTEGER NOT NULL, -- Unix seconds
///     scope         TEXT NOT NULL,
///     created_at    TEXT NOT NULL,
///     updated_at    TEXT NOT NULL,
///     PRIMARY KEY (team_id, user_id)
/// );
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthenticationProcessor;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS authentications (
    team_id       TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    token_type    TEXT NOT NULL,
    access_token  TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    expires_at    INTEGER NOT NULL,
    scope         TEXT NOT NULL,
    created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (team_id, user_id)
);
"#;

const SELECT: &str = r#"
SELECT token_type, access_token, refresh_token, expires_at, scope
FROM authentications
WHERE team_id = ?1 AND user_id = ?2
"#;

const INSERT: &str = r#"
INSERT INTO authentications (team_id, user_id, token_type, access_token, refresh_token, expires_at, scope)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT (team_id, user_id) DO UPDATE SET
    token_type = excluded.token_type,
    access_token = excluded.access_token,
    refresh_token = excluded.refresh_token,
    expires_at = excluded.expires_at,
    scope = excluded.scope,
    updated_at = CURRENT_TIMESTAMP
"#;

const UPDATE: &str = r#"
UPDATE authentications
SET token_type = ?3,
    access_token = ?4,
    refresh_token = ?5,
    expires_at = ?6,
    scope = ?7,
    updated_at = CURRENT_TIMESTAMP
WHERE team_id = ?1 AND user_id = ?2
"#;

const DELETE: &str = "DELETE FROM authentications WHERE team_id = ?1 AND user_id = ?2";

fn key_params(key: &AuthKey) -> Vec<Value> {
    vec![
        Value::Text(key.team_id.clone()),
        Value::Text(key.user_id.clone()),
    ]
}

fn record_params(key: &AuthKey, auth: &StoredAuthentication) -> Vec<Value> {
    let mut params = key_params(key);
    params.extend([
        Value::Text(auth.token_type.clone()),
        Value::Text(auth.access_token.clone()),
        Value::Text(auth.refresh_token.clone()),
        Value::Integer(auth.expires_at),
        Value::Text(auth.scope.clone()),
    ]);
    params
}

impl StorageProcessor<AuthKey, StoredAuthentication> for AuthenticationProcessor {
    fn table_name(&self) -> &'static str {
        "authentications"
    }

    fn schema(&self) -> &'static str {
        SCHEMA
    }

    fn select(&self, key: &AuthKey) -> Statement {
        Statement::new(SELECT, key_params(key))
    }

    fn scan(&self, _key: &AuthKey, row: &Row<'_>) -> rusqlite::Result<StoredAuthentication> {
        Ok(StoredAuthentication {
            token_type: row.get(0)?,
            access_token: row.get(1)?,
            refresh_token: row.get(2)?,
            expires_at: row.get(3)?,
            scope: row.get(4)?,
        })
    }

    fn insert(&self, key: &AuthKey, value: &StoredAuthentication) -> Statement {
        Statement::new(INSERT, record_params(key, value))
    }

    fn update(&self, key: &AuthKey, value: &StoredAuthentication) -> Statement {
        Statement::new(UPDATE, record_params(key, value))
    }

    fn delete(&self, key: &AuthKey) -> Statement {
        Statement::new(DELETE, key_params(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_connection, SqliteStorage, Storage, StorageError};

    fn create_test_storage() -> SqliteStorage<AuthKey, StoredAuthentication, AuthenticationProcessor> {
        let conn = open_connection(":memory:").expect("Failed to open database");
        SqliteStorage::new(conn, AuthenticationProcessor).expect("Failed to create storage")
    }

    fn record(access: &str, expires_at: i64) -> StoredAuthentication {
        StoredAuthentication {
            token_type: "bearer".to_string(),
            access_token: access.to_string(),
            refresh_token: format!("{}-refresh", access),
            expires_at,
            scope: "boards:read boards:write".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_and_find() {
        let storage = create_test_storage();
        let key = AuthKey::new("team1", "user1");

        storage.insert(&key, record("enc-access", 1_700_000_000)).await.unwrap();

        let found = storage.find(&key).await.unwrap();
        assert_eq!(found, record("enc-access", 1_700_000_000));
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let storage = create_test_storage();

        storage.insert(&AuthKey::new("team1", "user1"), record("a", 1)).await.unwrap();
        storage.insert(&AuthKey::new("team1", "user2"), record("b", 2)).await.unwrap();
        storage.insert(&AuthKey::new("team2", "user1"), record("c", 3)).await.unwrap();

        assert_eq!(storage.find(&AuthKey::new("team1", "user2")).await.unwrap().access_token, "b");
        assert_eq!(storage.find(&AuthKey::new("team2", "user1")).await.unwrap().access_token, "c");
        assert_eq!(
            storage.find(&AuthKey::new("team2", "user2")).await,
            Err(StorageError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_every_field() {
        let storage = create_test_storage();
        let key = AuthKey::new("team1", "user1");

        storage.insert(&key, record("old", 100)).await.unwrap();

        let replacement = StoredAuthentication {
            token_type: "Bearer".to_string(),
            access_token: "new".to_string(),
            refresh_token: "new-refresh".to_string(),
            expires_at: 200,
            scope: "identity:read".to_string(),
        };
        storage.insert(&key, replacement.clone()).await.unwrap();

        assert_eq!(storage.find(&key).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let storage = create_test_storage();
        let key = AuthKey::new("team1", "user1");

        assert_eq!(
            storage.update(&key, record("a", 1)).await,
            Err(StorageError::NotFound)
        );
    }
}
