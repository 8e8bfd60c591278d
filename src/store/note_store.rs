//! The Note Store: durable record of notes with sync metadata, atomic state
//! transitions.
//!
//! Each operation below is a single SQLite transaction/statement executed
//! against a connection guarded by `parking_lot::Mutex` for interior
//! mutability.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::model::{derive_note_id, Context, Note, SyncStatus};
use crate::remote_naming;
use crate::store::schema;

type Result<T> = std::result::Result<T, StoreError>;

/// Notes and contexts for one local database. Cheap to clone (shares the
/// underlying connection via `Arc`).
#[derive(Clone)]
pub struct NoteStore {
    conn: Arc<Mutex<Connection>>,
}

impl NoteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Share the underlying connection with a [`super::session_store::SqliteSessionStore`]
    /// so both draw from the same database file and migration.
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    // -- Notes ---------------------------------------------------------

    /// Insert or merge a note.
    ///
    /// `mark_pending = false` is only used by the bulk importer for notes
    /// already known to match the remote; such inserts land directly in
    /// `synced`, with `remote_id` set to the remote file stem derived from
    /// `date` (the capability treats `(context, date)` as the object's
    /// identity, so this is a stable handle even though the importer's
    /// source listing carries no separate remote id — see DESIGN.md).
    pub fn upsert_note(
        &self,
        user_id: &str,
        context: &str,
        date: &str,
        content: &str,
        mark_pending: bool,
        now: DateTime<Utc>,
    ) -> Result<Note> {
        let id = derive_note_id(user_id, context, date);
        let conn = self.conn.lock();

        let existing: Option<(bool, String)> = conn
            .query_row(
                "SELECT deleted, sync_status FROM notes WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, i64>(0)? != 0, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((true, _)) => {
                // Tombstone: preserve it, content update is a no-op.
            }
            Some((false, _)) => {
                conn.execute(
                    "UPDATE notes SET content = ?1, updated_at = ?2,
                     sync_pending = CASE WHEN ?3 THEN 1 ELSE sync_pending END,
                     sync_status = CASE WHEN ?3 THEN 'pending' ELSE sync_status END,
                     sync_retry_count = CASE WHEN ?3 THEN 0 ELSE sync_retry_count END,
                     sync_error = CASE WHEN ?3 THEN NULL ELSE sync_error END
                     WHERE id = ?4",
                    params![content, now.to_rfc3339(), mark_pending, id],
                )?;
            }
            None => {
                let (status, remote_id, synced_at) = if mark_pending {
                    (SyncStatus::Pending, None, None)
                } else {
                    (
                        SyncStatus::Synced,
                        remote_naming::to_remote_file_stem(date),
                        Some(now),
                    )
                };
                conn.execute(
                    "INSERT INTO notes (
                        id, user_id, context, date, content, remote_id,
                        sync_pending, sync_status, sync_retry_count,
                        sync_last_attempt_at, sync_error, deleted,
                        created_at, updated_at, synced_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, NULL, 0, ?9, ?9, ?10)",
                    params![
                        id,
                        user_id,
                        context,
                        date,
                        content,
                        remote_id,
                        mark_pending,
                        status.as_str(),
                        now.to_rfc3339(),
                        synced_at.map(|t: DateTime<Utc>| t.to_rfc3339()),
                    ],
                )?;
            }
        }

        drop(conn);
        self.get_by_id(&id)?.ok_or(StoreError::NotFound(id))
    }

    /// Up to `limit` pending rows, oldest `updated_at` first.
    pub fn get_pending_batch(&self, limit: u32) -> Result<Vec<Note>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM notes WHERE sync_pending = 1 ORDER BY updated_at ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn mark_syncing(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE notes SET sync_status = 'syncing', sync_last_attempt_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_synced(&self, id: &str, remote_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE notes SET remote_id = ?1, sync_pending = 0, sync_status = 'synced',
             sync_retry_count = 0, sync_error = NULL, synced_at = ?2 WHERE id = ?3",
            params![remote_id, now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_sync_failed(
        &self,
        id: &str,
        err_msg: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE notes SET
                sync_error = ?1,
                sync_last_attempt_at = ?2,
                sync_status = CASE WHEN sync_retry_count + 1 >= ?3 THEN 'abandoned' ELSE 'failed' END,
                sync_pending = CASE WHEN sync_retry_count + 1 >= ?3 THEN 0 ELSE 1 END,
                sync_retry_count = sync_retry_count + 1
             WHERE id = ?4",
            params![err_msg, now.to_rfc3339(), max_retries, id],
        )?;
        Ok(())
    }

    /// Unconditionally remove a row. Only called after remote deletion
    /// succeeds.
    pub fn hard_delete(&self, user_id: &str, context: &str, date: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM notes WHERE user_id = ?1 AND context = ?2 AND date = ?3",
            params![user_id, context, date],
        )?;
        Ok(())
    }

    /// Soft delete: marks the tombstone and re-arms the row for sync
    /// (resetting retry state, since a previously-abandoned row must become
    /// eligible for pending again).
    pub fn soft_delete(
        &self,
        user_id: &str,
        context: &str,
        date: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE notes SET deleted = 1, sync_pending = 1, sync_status = 'pending',
             sync_retry_count = 0, sync_error = NULL, updated_at = ?1
             WHERE user_id = ?2 AND context = ?3 AND date = ?4",
            params![now.to_rfc3339(), user_id, context, date],
        )?;
        Ok(())
    }

    /// Operator-initiated re-arm of an `abandoned` (or any other) row.
    pub fn retry(&self, id: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE notes SET sync_pending = 1, sync_status = 'pending',
             sync_retry_count = 0, sync_error = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Note>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM notes WHERE id = ?1", params![id], row_to_note)
            .optional()
            .map_err(StoreError::from)
    }

    /// Counts and recent failures for the `syncStatus` endpoint:
    /// `{pendingCount, failedCount, failedNotes[<=50]}`.
    pub fn sync_status(&self, user_id: &str) -> Result<SyncStatusSnapshot> {
        let conn = self.conn.lock();
        let pending_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE user_id = ?1 AND sync_pending = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        let failed_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE user_id = ?1 AND sync_status IN ('failed', 'abandoned')",
            params![user_id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT * FROM notes WHERE user_id = ?1 AND sync_status IN ('failed', 'abandoned')
             ORDER BY sync_last_attempt_at DESC LIMIT 50",
        )?;
        let failed_notes = stmt
            .query_map(params![user_id], row_to_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(SyncStatusSnapshot {
            pending_count: pending_count as u64,
            failed_count: failed_count as u64,
            failed_notes,
        })
    }

    // -- Contexts --------------------------------------------------------

    pub fn create_context_if_missing(
        &self,
        user_id: &str,
        name: &str,
        color: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO contexts (id, user_id, name, color, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                user_id,
                name,
                color,
                now.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn list_contexts(&self, user_id: &str) -> Result<Vec<Context>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, user_id, name, color, created_at FROM contexts WHERE user_id = ?1")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(Context {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    color: row.get(3)?,
                    created_at: parse_rfc3339(row.get::<_, String>(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_contexts(&self, user_id: &str) -> Result<u64> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM contexts WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Result of the `syncStatus` inward interface operation.
#[derive(Debug, Clone)]
pub struct SyncStatusSnapshot {
    pub pending_count: u64,
    pub failed_count: u64,
    pub failed_notes: Vec<Note>,
}

fn parse_rfc3339(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let sync_status: String = row.get("sync_status")?;
    let sync_last_attempt_at: Option<String> = row.get("sync_last_attempt_at")?;
    let synced_at: Option<String> = row.get("synced_at")?;
    Ok(Note {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        context: row.get("context")?,
        date: row.get("date")?,
        content: row.get("content")?,
        remote_id: row.get("remote_id")?,
        sync_pending: row.get::<_, i64>("sync_pending")? != 0,
        sync_status: SyncStatus::parse(&sync_status).unwrap_or(SyncStatus::Pending),
        sync_retry_count: row.get::<_, i64>("sync_retry_count")? as u32,
        sync_last_attempt_at: sync_last_attempt_at.map(parse_rfc3339),
        sync_error: row.get("sync_error")?,
        deleted: row.get::<_, i64>("deleted")? != 0,
        created_at: parse_rfc3339(row.get("created_at")?),
        updated_at: parse_rfc3339(row.get("updated_at")?),
        synced_at: synced_at.map(parse_rfc3339),
    })
}
