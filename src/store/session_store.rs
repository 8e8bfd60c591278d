//! Persistence for refreshed credentials, keyed by user.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::credential::Credential;
use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Where the credential provider reads and writes the credential it has on
/// file for a user. Separate from [`super::note_store::NoteStore`] so an
/// embedder can back sessions with a different store (a keychain, a secrets
/// manager) without touching note persistence.
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<Credential>>;
    fn put(&self, user_id: &str, credential: &Credential) -> Result<()>;
}

/// Default [`SessionStore`] backed by the same SQLite file as the notes.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Share a connection already opened (and migrated) by [`super::note_store::NoteStore`].
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        super::schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, user_id: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT access_token, refresh_token, expiry FROM sessions WHERE user_id = ?1",
            params![user_id],
            |row| {
                let expiry: String = row.get(2)?;
                Ok(Credential::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    parse_rfc3339(expiry),
                ))
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn put(&self, user_id: &str, credential: &Credential) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO sessions (user_id, access_token, refresh_token, expiry)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expiry = excluded.expiry",
            params![
                user_id,
                credential.access_token.as_str(),
                credential.refresh_token.as_str(),
                credential.expiry.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn parse_rfc3339(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
