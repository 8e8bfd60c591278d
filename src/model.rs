//! Core data model: notes, contexts, and the sync lifecycle they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync lifecycle state of a [`Note`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Abandoned,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "syncing" => Some(SyncStatus::Syncing),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            "abandoned" => Some(SyncStatus::Abandoned),
            _ => None,
        }
    }
}

/// Deterministic surrogate id: `userId-context-date`. Reconstructible from
/// its parts so the retry API can validate ownership without a lookup.
pub fn derive_note_id(user_id: &str, context: &str, date: &str) -> String {
    format!("{user_id}-{context}-{date}")
}

/// A journal entry row, including its sync metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub context: String,
    pub date: String,
    pub content: String,
    pub remote_id: Option<String>,
    pub sync_pending: bool,
    pub sync_status: SyncStatus,
    pub sync_retry_count: u32,
    pub sync_last_attempt_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// A logical folder grouping notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row as handed to [`crate::sync_batch::sync_batch`] — just enough to
/// drive one replication attempt.
#[derive(Debug, Clone)]
pub struct PendingRow {
    pub id: String,
    pub user_id: String,
    pub context: String,
    pub date: String,
    pub content: String,
    pub deleted: bool,
    pub remote_id: Option<String>,
}

impl From<&Note> for PendingRow {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            user_id: note.user_id.clone(),
            context: note.context.clone(),
            date: note.date.clone(),
            content: note.content.clone(),
            deleted: note.deleted,
            remote_id: note.remote_id.clone(),
        }
    }
}
