// SqliteCursorStore: rusqlite backend for the cursor.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Each call locks, runs a synchronous statement, and returns; the guard is
// never held across an .await.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::warn;

use super::CursorStore;
use crate::platform::PostId;

const CURSOR_KEY: &str = "mentions_cursor";
const LAST_POLL_KEY: &str = "last_poll_at";

pub struct SqliteCursorStore {
    conn: Mutex<Connection>,
}

impl SqliteCursorStore {
    /// Open (or create) the database at `db_path` and ensure the table exists.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory for database: {}", db_path)
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Wrap an already-opened connection (used by tests with in-memory DBs).
    pub fn from_connection(conn: Connection) -> Result<Self> {
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Create the scan_state table if it doesn't exist yet. Idempotent.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Poller state: cursor and last-poll timestamp
        CREATE TABLE IF NOT EXISTS scan_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )
    .context("Failed to create scan_state table")?;
    Ok(())
}

/// Get a scan state value by key.
pub fn get_scan_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM scan_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a scan state value (upsert).
pub fn set_scan_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self) -> Result<Option<PostId>> {
        let conn = self.conn.lock().await;
        let raw = get_scan_state(&conn, CURSOR_KEY)?;
        Ok(raw.and_then(|value| match value.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(value = %value, "Ignoring unparseable cursor in scan_state");
                None
            }
        }))
    }

    async fn save(&self, cursor: PostId) -> Result<()> {
        let conn = self.conn.lock().await;
        set_scan_state(&conn, CURSOR_KEY, &cursor.to_string())
    }

    async fn record_poll(&self, at: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        set_scan_state(&conn, LAST_POLL_KEY, at)
    }

    async fn last_poll(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        get_scan_state(&conn, LAST_POLL_KEY)
    }
}
