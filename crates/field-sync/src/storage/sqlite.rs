//! SQLite field backend.
//!
//! Implements `FieldBackend` using rusqlite (bundled). The connection is
//! guarded by a `parking_lot::Mutex`; every statement runs to completion
//! while the guard is held, so no reentrancy is needed.

use std::path::Path;

use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};

use crate::error::StoreError;
use crate::types::{FieldEntry, FieldKey, Timestamp, UserId};

use super::traits::{FieldBackend, ScanFilter};

const SELECT_COLS: &str =
    "SELECT user_id, field_id, category, value, last_modified_at, last_synced_at FROM fields";

/// Raw column values of one `fields` row, before timestamp decoding.
type RawRow = (String, String, String, String, i64, Option<i64>);

// ============================================================================
// SqliteBackend
// ============================================================================

pub struct SqliteBackend {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteBackend {
    /// Open (or create) a file-backed database and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (useful for tests and ephemeral sessions).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        // synchronous=FULL: a put that returned must survive a crash.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA busy_timeout=5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fields (
                user_id          TEXT NOT NULL,
                field_id         TEXT NOT NULL,
                category         TEXT NOT NULL DEFAULT '',
                value            TEXT NOT NULL,
                last_modified_at INTEGER NOT NULL,
                last_synced_at   INTEGER,
                PRIMARY KEY (user_id, field_id)
            );
            CREATE INDEX IF NOT EXISTS idx_fields_category
                ON fields(user_id, category);
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema:version', '1')",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stored schema version.
    pub fn schema_version(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let v = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema:version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode(raw: RawRow) -> Result<FieldEntry, StoreError> {
        let (user_id, field_id, category, value, modified_us, synced_us) = raw;
        let key = FieldKey::new(user_id, field_id);

        let last_modified_at = decode_micros(modified_us)
            .ok_or_else(|| StoreError::corruption(&key, "last_modified_at", "timestamp out of range"))?;
        let last_synced_at = match synced_us {
            None => None,
            Some(us) => Some(decode_micros(us).ok_or_else(|| {
                StoreError::corruption(&key, "last_synced_at", "timestamp out of range")
            })?),
        };

        Ok(FieldEntry {
            key,
            category,
            value,
            last_modified_at,
            last_synced_at,
        })
    }
}

fn decode_micros(us: i64) -> Option<Timestamp> {
    DateTime::from_timestamp_micros(us)
}

impl FieldBackend for SqliteBackend {
    fn get_raw(&self, key: &FieldKey) -> Result<Option<FieldEntry>, StoreError> {
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_COLS} WHERE user_id = ?1 AND field_id = ?2"
            ))?;
            let row = stmt
                .query_row(params![key.user_id.as_str(), key.field_id], Self::read_row)
                .optional()?;
            row
        };
        raw.map(Self::decode).transpose()
    }

    fn put_raw(&self, entry: &FieldEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO fields \
             (user_id, field_id, category, value, last_modified_at, last_synced_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.key.user_id.as_str(),
                entry.key.field_id,
                entry.category,
                entry.value,
                entry.last_modified_at.timestamp_micros(),
                entry.last_synced_at.map(|t| t.timestamp_micros()),
            ],
        )?;
        Ok(())
    }

    fn scan_raw(&self, user: &UserId, filter: &ScanFilter) -> Result<Vec<FieldEntry>, StoreError> {
        let mut conditions = vec!["user_id = ?1".to_string()];
        let mut args: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(user.as_str().to_string())];

        if filter.dirty_only {
            conditions
                .push("(last_synced_at IS NULL OR last_synced_at < last_modified_at)".to_string());
        }
        if let Some(category) = &filter.category {
            conditions.push(format!("category = ?{}", args.len() + 1));
            args.push(rusqlite::types::Value::Text(category.clone()));
        }

        let sql = format!(
            "{SELECT_COLS} WHERE {} ORDER BY field_id",
            conditions.join(" AND ")
        );

        let rows: Vec<RawRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let iter = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::read_row)?;
            iter.collect::<rusqlite::Result<Vec<_>>>()?
        };

        rows.into_iter().map(Self::decode).collect()
    }
}
