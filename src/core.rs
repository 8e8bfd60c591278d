//! The `Core` facade: a bootstrapper-constructed value carrying every
//! collaborator the replication core needs, and the five inward-interface
//! operations (§6) the external handler layer calls into.
//!
//! There is no global mutable singleton anywhere in this crate — every
//! caller builds one `Core` and threads it through, per the "Global mutable
//! singletons" redesign flag.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::capability::RemoteCapabilityFactory;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::credential::{Credential, CredentialProvider, TokenRefresher};
use crate::error::CoreError;
use crate::immediate::spawn_immediate_sync;
use crate::importer::{import_on_login as run_bulk_import, ImportReport};
use crate::model::Note;
use crate::store::{NoteStore, SessionStore, SyncStatusSnapshot};
use crate::sync_batch::SyncBatchOutcome;

/// Every injected collaborator the core needs, plus the tunables of
/// [`Config`]. Construct one per process (or per test) with [`Core::new`].
#[derive(Clone)]
pub struct Core {
    store: NoteStore,
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<CredentialProvider>,
    capability_factory: Arc<dyn RemoteCapabilityFactory>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Core {
    pub fn new(
        store: NoteStore,
        sessions: Arc<dyn SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        capability_factory: Arc<dyn RemoteCapabilityFactory>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        let credentials = Arc::new(CredentialProvider::new(
            sessions.clone(),
            refresher,
            clock.clone(),
        ));
        Self {
            store,
            sessions,
            credentials,
            capability_factory,
            clock,
            config,
        }
    }

    /// Construct a `Core` with the real system clock. Tests generally want
    /// [`Core::new`] directly with a [`crate::clock::FakeClock`] instead.
    pub fn with_system_clock(
        store: NoteStore,
        sessions: Arc<dyn SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        capability_factory: Arc<dyn RemoteCapabilityFactory>,
        config: Config,
    ) -> Self {
        Self::new(
            store,
            sessions,
            refresher,
            capability_factory,
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `write(userId, context, date, content)` — §6. Upserts the note
    /// (always marking it pending; a write is always new work) and launches
    /// Immediate Sync in the background. The returned handle lets callers
    /// that care (mainly tests) await the replication attempt; production
    /// call sites are free to drop it, per §9's task-handle redesign flag.
    pub fn write(
        &self,
        user_id: &str,
        context: &str,
        date: &str,
        content: &str,
    ) -> Result<(Note, JoinHandle<SyncBatchOutcome>), CoreError> {
        let now = self.clock.now();
        let note = self
            .store
            .upsert_note(user_id, context, date, content, true, now)?;

        let handle = spawn_immediate_sync(
            self.store.clone(),
            self.credentials.clone(),
            self.capability_factory.clone(),
            self.clock.clone(),
            self.config.clone(),
            user_id.to_string(),
            note.id.clone(),
        );

        Ok((note, handle))
    }

    /// `delete(userId, context, date)` — §6. Soft-deletes only; the
    /// tombstone is picked up by the next Sync Worker tick like any other
    /// pending row. No Immediate Sync launch for deletes (spec §6 names one
    /// only for `write`).
    pub fn delete(&self, user_id: &str, context: &str, date: &str) -> Result<(), CoreError> {
        let now = self.clock.now();
        self.store.soft_delete(user_id, context, date, now)?;
        Ok(())
    }

    /// `syncStatus(userId)` — §6. `pendingCount`/`failedCount` scoped to
    /// this user; `failedNotes` capped at 50, most recent attempt first.
    pub fn sync_status(&self, user_id: &str) -> Result<SyncStatusSnapshot, CoreError> {
        Ok(self.store.sync_status(user_id)?)
    }

    /// `retrySync(noteId, userId)` — §6. Ownership is checked by prefix
    /// match against the deterministic id (`userId-context-date`), not by a
    /// row lookup, so it also rejects ids for notes that don't exist.
    pub fn retry_sync(&self, note_id: &str, user_id: &str) -> Result<(), CoreError> {
        let prefix = format!("{user_id}-");
        if !note_id.starts_with(&prefix) {
            return Err(CoreError::Unauthorized);
        }
        self.store.retry(note_id)?;
        Ok(())
    }

    /// `importOnLogin(userId, credential)` — §6. The credential handed in
    /// at login is persisted first (it is the freshest one the caller has),
    /// then the Bulk Importer is launched iff the user currently has zero
    /// local contexts. Returns `None` without launching anything otherwise,
    /// matching §4.6's precondition.
    pub fn import_on_login(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> Result<Option<JoinHandle<ImportReport>>, CoreError> {
        self.sessions.put(user_id, &credential)?;

        if self.store.count_contexts(user_id)? > 0 {
            return Ok(None);
        }

        Ok(Some(run_bulk_import(
            self.store.clone(),
            self.credentials.clone(),
            self.capability_factory.clone(),
            self.clock.clone(),
            user_id.to_string(),
        )))
    }

    /// Start the background Sync Worker (C4). Idempotent in the sense that
    /// each call returns an independent [`crate::worker::WorkerHandle`];
    /// callers are responsible for starting at most one per process.
    pub fn start_worker(&self) -> crate::worker::WorkerHandle {
        crate::worker::start_worker(
            self.store.clone(),
            self.credentials.clone(),
            self.capability_factory.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{RemoteCapability, RemoteConfig, RemoteNote};
    use crate::clock::FakeClock;
    use crate::credential::Credential;
    use crate::error::CapabilityError;
    use crate::model::SyncStatus;
    use crate::store::SqliteSessionStore;
    use async_trait::async_trait;
    use chrono::Duration;

    struct AlwaysOkCapability {
        credential: Credential,
    }

    #[async_trait]
    impl RemoteCapability for AlwaysOkCapability {
        async fn upsert_note(
            &self,
            context: &str,
            date: &str,
            _content: &str,
        ) -> Result<String, CapabilityError> {
            Ok(format!("remote-{context}-{date}"))
        }
        async fn delete_note(&self, _context: &str, _date: &str) -> Result<(), CapabilityError> {
            Ok(())
        }
        async fn get_all_notes_in_context(
            &self,
            _context: &str,
        ) -> Result<Vec<RemoteNote>, CapabilityError> {
            Ok(vec![])
        }
        async fn get_config(&self) -> Result<RemoteConfig, CapabilityError> {
            Ok(RemoteConfig {
                root_path: "root".into(),
                contexts: vec![],
            })
        }
        async fn cleanup_old_deletions(&self) -> Result<(), CapabilityError> {
            Ok(())
        }
        fn current_credential(&self) -> &Credential {
            &self.credential
        }
    }

    struct AlwaysOkFactory;
    impl RemoteCapabilityFactory for AlwaysOkFactory {
        fn build(&self, _user_id: &str, credential: Credential) -> Box<dyn RemoteCapability> {
            Box::new(AlwaysOkCapability { credential })
        }
    }

    struct NeverRefresh;
    #[async_trait]
    impl TokenRefresher for NeverRefresh {
        async fn refresh(
            &self,
            _refresh_token: &str,
        ) -> Result<Credential, crate::error::CredentialError> {
            panic!("should not refresh in this test");
        }
    }

    fn test_core(now: chrono::DateTime<Utc>) -> (Core, NoteStore) {
        let store = NoteStore::open_in_memory().unwrap();
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(store.shared_connection()));
        let core = Core::new(
            store.clone(),
            sessions,
            Arc::new(NeverRefresh),
            Arc::new(AlwaysOkFactory),
            Arc::new(FakeClock::new(now)),
            Config::default(),
        );
        (core, store)
    }

    #[tokio::test]
    async fn write_marks_pending_and_immediate_sync_lands_it_synced() {
        let now = Utc::now();
        let (core, store) = test_core(now);
        core.sessions
            .put("u1", &Credential::new("a", "r", now + Duration::hours(1)))
            .unwrap();

        let (note, handle) = core.write("u1", "Work", "2025-10-18", "hello").unwrap();
        assert_eq!(note.sync_status, SyncStatus::Pending);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.synced, vec![note.id.clone()]);

        let persisted = store.get_by_id(&note.id).unwrap().unwrap();
        assert_eq!(persisted.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn delete_soft_deletes_without_launching_immediate_sync() {
        let now = Utc::now();
        let (core, store) = test_core(now);
        core.write("u1", "Work", "2025-10-18", "hello").unwrap();
        // Drain the immediate-sync task implicitly by not awaiting it; the
        // row may still be `pending` or `synced` depending on scheduling,
        // but either way `delete` must leave a tombstone.
        core.delete("u1", "Work", "2025-10-18").unwrap();

        let row = store.get_by_id("u1-Work-2025-10-18").unwrap().unwrap();
        assert!(row.deleted);
        assert!(row.sync_pending);
    }

    #[tokio::test]
    async fn retry_sync_rejects_mismatched_user() {
        let now = Utc::now();
        let (core, _store) = test_core(now);
        core.write("u1", "Work", "2025-10-18", "hello").unwrap();

        let err = core.retry_sync("u1-Work-2025-10-18", "u2").unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized));
    }

    #[tokio::test]
    async fn retry_sync_accepts_matching_user() {
        let now = Utc::now();
        let (core, store) = test_core(now);
        core.write("u1", "Work", "2025-10-18", "hello").unwrap();
        for _ in 0..5 {
            store
                .mark_sync_failed("u1-Work-2025-10-18", "boom", 5, now)
                .unwrap();
        }

        core.retry_sync("u1-Work-2025-10-18", "u1").unwrap();
        let row = store.get_by_id("u1-Work-2025-10-18").unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn import_on_login_skips_users_with_existing_contexts() {
        let now = Utc::now();
        let (core, store) = test_core(now);
        store
            .create_context_if_missing("u1", "Work", None, now)
            .unwrap();

        let handle = core
            .import_on_login("u1", Credential::new("a", "r", now + Duration::hours(1)))
            .unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn import_on_login_persists_credential_even_when_skipped() {
        let now = Utc::now();
        let (core, store) = test_core(now);
        store
            .create_context_if_missing("u1", "Work", None, now)
            .unwrap();

        core.import_on_login("u1", Credential::new("fresh", "r", now + Duration::hours(1)))
            .unwrap();

        let persisted = core.sessions.get("u1").unwrap().unwrap();
        assert_eq!(persisted.access_token.as_str(), "fresh");
    }

    #[tokio::test]
    async fn import_on_login_runs_for_user_with_no_contexts() {
        let now = Utc::now();
        let (core, store) = test_core(now);

        let handle = core
            .import_on_login("u1", Credential::new("a", "r", now + Duration::hours(1)))
            .unwrap()
            .expect("import should run");
        let report = handle.await.unwrap();
        assert_eq!(report.contexts_created, 0);
        assert_eq!(store.count_contexts("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn sync_status_reflects_pending_and_failed_counts() {
        let now = Utc::now();
        let (core, store) = test_core(now);
        core.write("u1", "Work", "2025-10-18", "a").unwrap();
        core.write("u1", "Work", "2025-10-19", "b").unwrap();
        store
            .mark_sync_failed("u1-Work-2025-10-19", "boom", 5, now)
            .unwrap();

        let status = core.sync_status("u1").unwrap();
        assert_eq!(status.pending_count, 2);
        assert_eq!(status.failed_count, 1);
    }
}
