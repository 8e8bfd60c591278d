//! DDL for the tables the core owns: `notes` and `contexts`, plus the
//! `sessions` table the credential provider uses to persist refreshed
//! tokens.

use rusqlite::{Connection, Result};

const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id                   TEXT PRIMARY KEY,
            user_id              TEXT NOT NULL,
            context              TEXT NOT NULL,
            date                 TEXT NOT NULL,
            content              TEXT NOT NULL,
            remote_id            TEXT,
            sync_pending         INTEGER NOT NULL,
            sync_status          TEXT NOT NULL,
            sync_retry_count     INTEGER NOT NULL DEFAULT 0,
            sync_last_attempt_at TEXT,
            sync_error           TEXT,
            deleted              INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL,
            synced_at            TEXT,
            UNIQUE (user_id, context, date)
        );

        CREATE INDEX IF NOT EXISTS idx_notes_user_context ON notes (user_id, context);
        CREATE INDEX IF NOT EXISTS idx_notes_user_date ON notes (user_id, date);
        CREATE INDEX IF NOT EXISTS idx_notes_pending ON notes (sync_pending) WHERE sync_pending = 1;

        CREATE TABLE IF NOT EXISTS contexts (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            name       TEXT NOT NULL,
            color      TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, name)
        );

        -- Keyed by user_id rather than a separate session id: every lookup
        -- is by user.
        CREATE TABLE IF NOT EXISTS sessions (
            user_id       TEXT PRIMARY KEY,
            access_token  TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            expiry        TEXT NOT NULL
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
