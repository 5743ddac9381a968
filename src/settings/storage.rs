//! `settings` table layout and statements.

use super::{Demo, Settings, SettingsKey};
use crate::storage::{Statement, StorageProcessor};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;

/// Query building for [`Settings`] records. The secret column holds ciphertext.
#[derive(Clone, Copy, Debug, Default)]
pub struct SettingsProcessor;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    team_id      TEXT NOT NULL,
    board_id     TEXT NOT NULL,
    address      TEXT NOT NULL DEFAULT '',
    header       TEXT NOT NULL DEFAULT '',
    secret       TEXT NOT NULL DEFAULT '',
    demo_enabled INTEGER NOT NULL DEFAULT 0,
    demo_started TEXT,
    created_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (team_id, board_id)
);
"#;

const SELECT: &str = r#"
SELECT address, header, secret, demo_enabled, demo_started
FROM settings
WHERE team_id = ?1 AND board_id = ?2
"#;

const INSERT: &str = r#"
INSERT INTO settings (team_id, board_id, address, header, secret, demo_enabled, demo_started)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT (team_id, board_id) DO UPDATE SET
    address = excluded.address,
    header = excluded.header,
    secret = excluded.secret,
    demo_enabled = excluded.demo_enabled,
    demo_started = excluded.demo_started,
    updated_at = CURRENT_TIMESTAMP
"#;

const UPDATE: &str = r#"
UPDATE settings
SET address = ?3,
    header = ?4,
    secret = ?5,
    demo_enabled = ?6,
    demo_started = ?7,
    updated_at = CURRENT_TIMESTAMP
WHERE team_id = ?1 AND board_id = ?2
"#;

const DELETE: &str = "DELETE FROM settings WHERE team_id = ?1 AND board_id = ?2";

fn key_params(key: &SettingsKey) -> Vec<Value> {
    vec![
        Value::Text(key.team_id.clone()),
        Value::Text(key.board_id.clone()),
    ]
}

fn record_params(key: &SettingsKey, settings: &Settings) -> Vec<Value> {
    let mut params = key_params(key);
    params.extend([
        Value::Text(settings.address.clone()),
        Value::Text(settings.header.clone()),
        Value::Text(settings.secret.clone()),
        Value::Integer(i64::from(settings.demo.enabled)),
        settings
            .demo
            .started
            .map(|started| Value::Text(started.to_rfc3339()))
            .unwrap_or(Value::Null),
    ]);
    params
}

impl StorageProcessor<SettingsKey, Settings> for SettingsProcessor {
    fn table_name(&self) -> &'static str {
        "settings"
    }

    fn schema(&self) -> &'static str {
        SCHEMA
    }

    fn select(&self, key: &SettingsKey) -> Statement {
        Statement::new(SELECT, key_params(key))
    }

    fn scan(&self, _key: &SettingsKey, row: &Row<'_>) -> rusqlite::Result<Settings> {
        let started = row
            .get::<_, Option<String>>(4)?
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))
            })
            .transpose()?;

        Ok(Settings {
            address: row.get(0)?,
            header: row.get(1)?,
            secret: row.get(2)?,
            demo: Demo {
                enabled: row.get::<_, i64>(3)? != 0,
                started,
            },
        })
    }

    fn insert(&self, key: &SettingsKey, value: &Settings) -> Statement {
        Statement::new(INSERT, record_params(key, value))
    }

    fn update(&self, key: &SettingsKey, value: &Settings) -> Statement {
        Statement::new(UPDATE, record_params(key, value))
    }

    fn delete(&self, key: &SettingsKey) -> Statement {
        Statement::new(DELETE, key_params(key))
    }
}
