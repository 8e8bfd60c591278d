//! The background Sync Worker: periodically drains the pending queue across
//! all users and replicates it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::capability::RemoteCapabilityFactory;
use crate::clock::Clock;
use crate::config::Config;
use crate::credential::CredentialProvider;
use crate::model::PendingRow;
use crate::store::NoteStore;
use crate::sync_batch::{sync_batch, SyncBatchOutcome};

/// Telemetry for a single worker tick, surfaced for tests and logging.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub users_processed: usize,
    pub rows_synced: usize,
    pub rows_failed: usize,
    pub rows_skipped_anti_race: usize,
}

/// A running Sync Worker. Dropping this without calling [`WorkerHandle::stop`]
/// leaves the task running in the background; callers that care about
/// graceful shutdown should always call `stop`.
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

/// Start the Sync Worker. Its tick interval starts at `config.base_interval`
/// and backs off towards `config.max_interval` when a tick finds nothing to
/// do, resetting to `base_interval` as soon as there's work again.
pub fn start_worker(
    store: NoteStore,
    credentials: Arc<CredentialProvider>,
    capability_factory: Arc<dyn RemoteCapabilityFactory>,
    clock: Arc<dyn Clock>,
    config: Config,
) -> WorkerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut interval = config.base_interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
            if *stop_rx.borrow() {
                break;
            }

            let report = tick(&store, &credentials, capability_factory.as_ref(), clock.as_ref(), &config).await;
            info!(
                users = report.users_processed,
                synced = report.rows_synced,
                failed = report.rows_failed,
                skipped = report.rows_skipped_anti_race,
                interval_secs = interval.as_secs(),
                "sync worker tick complete"
            );

            interval = if report.users_processed == 0 {
                std::cmp::min(interval.saturating_mul(2), config.max_interval)
            } else {
                config.base_interval
            };
        }
    });

    WorkerHandle { stop_tx, join }
}

/// Run a single tick: fetch a batch of pending rows, filter out anything
/// too recently touched by either a write or an Immediate Sync attempt
/// (left for the Immediate Sync path to avoid racing it), group the rest
/// by user, and replicate each group.
pub async fn tick(
    store: &NoteStore,
    credentials: &CredentialProvider,
    capability_factory: &dyn RemoteCapabilityFactory,
    clock: &dyn Clock,
    config: &Config,
) -> TickReport {
    let mut report = TickReport::default();

    let batch = match store.get_pending_batch(config.batch_size) {
        Ok(rows) => rows,
        Err(e) => {
            debug!(error = %e, "failed to fetch pending batch");
            return report;
        }
    };

    let now = clock.now();
    let anti_race = chrono::Duration::from_std(config.anti_race_window).unwrap_or_default();

    let mut by_user: HashMap<String, Vec<PendingRow>> = HashMap::new();
    for note in batch {
        let last_activity = note.sync_last_attempt_at.unwrap_or(note.updated_at).max(note.updated_at);
        if now - last_activity < anti_race {
            report.rows_skipped_anti_race += 1;
            continue;
        }
        by_user
            .entry(note.user_id.clone())
            .or_default()
            .push(PendingRow::from(&note));
    }

    for (user_id, rows) in by_user {
        report.users_processed += 1;
        let outcome: SyncBatchOutcome = sync_batch(
            store,
            credentials,
            capability_factory,
            clock,
            config.max_retries,
            &user_id,
            rows,
        )
        .await;
        report.rows_synced += outcome.synced.len();
        report.rows_failed += outcome.failed.len();
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{RemoteCapability, RemoteConfig, RemoteNote};
    use crate::clock::FakeClock;
    use crate::credential::{Credential, TokenRefresher};
    use crate::error::{CapabilityError, CredentialError};
    use crate::store::SqliteSessionStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

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
        async fn refresh(&self, _refresh_token: &str) -> Result<Credential, CredentialError> {
            panic!("should not refresh in this test");
        }
    }

    fn credentials_for(store: &NoteStore, clock: Arc<FakeClock>, user_id: &str) -> CredentialProvider {
        let sessions: Arc<dyn crate::store::SessionStore> =
            Arc::new(SqliteSessionStore::new(store.shared_connection()));
        sessions
            .put(
                user_id,
                &Credential::new("access", "refresh", clock.now() + ChronoDuration::hours(1)),
            )
            .unwrap();
        CredentialProvider::new(sessions, Arc::new(NeverRefresh), clock)
    }

    #[tokio::test]
    async fn tick_skips_rows_inside_anti_race_window() {
        let store = NoteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .upsert_note("u1", "Work", "2025-10-18", "fresh", true, now)
            .unwrap();

        let clock = Arc::new(FakeClock::new(now));
        let credentials = credentials_for(&store, clock.clone(), "u1");
        let factory = AlwaysOkFactory;
        let config = Config::default();

        let report = tick(&store, &credentials, &factory, clock.as_ref(), &config).await;
        assert_eq!(report.rows_skipped_anti_race, 1);
        assert_eq!(report.users_processed, 0);
    }

    #[tokio::test]
    async fn tick_processes_rows_past_the_anti_race_window() {
        let store = NoteStore::open_in_memory().unwrap();
        let created_at = Utc::now();
        store
            .upsert_note("u1", "Work", "2025-10-18", "old enough", true, created_at)
            .unwrap();

        let clock = Arc::new(FakeClock::new(
            created_at + ChronoDuration::seconds(31),
        ));
        let credentials = credentials_for(&store, clock.clone(), "u1");
        let factory = AlwaysOkFactory;
        let config = Config::default();

        let report = tick(&store, &credentials, &factory, clock.as_ref(), &config).await;
        assert_eq!(report.rows_skipped_anti_race, 0);
        assert_eq!(report.users_processed, 1);
        assert_eq!(report.rows_synced, 1);
    }

    #[tokio::test]
    async fn tick_skips_rows_recently_attempted_by_immediate_sync() {
        let store = NoteStore::open_in_memory().unwrap();
        let created_at = Utc::now() - ChronoDuration::hours(1);
        store
            .upsert_note("u1", "Work", "2025-10-18", "old row, recent attempt", true, created_at)
            .unwrap();

        // Immediate Sync touched this row moments ago; `updated_at` is old
        // but `sync_last_attempt_at` is fresh.
        let attempted_at = Utc::now() - ChronoDuration::seconds(1);
        store
            .mark_syncing("u1-Work-2025-10-18", attempted_at)
            .unwrap();

        let clock = Arc::new(FakeClock::new(Utc::now()));
        let credentials = credentials_for(&store, clock.clone(), "u1");
        let factory = AlwaysOkFactory;
        let config = Config::default();

        let report = tick(&store, &credentials, &factory, clock.as_ref(), &config).await;
        assert_eq!(report.rows_skipped_anti_race, 1);
        assert_eq!(report.users_processed, 0);
    }

    #[tokio::test]
    async fn tick_groups_rows_by_user() {
        let store = NoteStore::open_in_memory().unwrap();
        let created_at = Utc::now() - ChronoDuration::seconds(60);
        store
            .upsert_note("u1", "Work", "2025-10-18", "a", true, created_at)
            .unwrap();
        store
            .upsert_note("u2", "Work", "2025-10-18", "b", true, created_at)
            .unwrap();

        let clock = Arc::new(FakeClock::new(Utc::now()));
        let sessions: Arc<dyn crate::store::SessionStore> =
            Arc::new(SqliteSessionStore::new(store.shared_connection()));
        for user_id in ["u1", "u2"] {
            sessions
                .put(
                    user_id,
                    &Credential::new("access", "refresh", clock.now() + ChronoDuration::hours(1)),
                )
                .unwrap();
        }
        let credentials = CredentialProvider::new(sessions, Arc::new(NeverRefresh), clock.clone());
        let factory = AlwaysOkFactory;
        let config = Config::default();

        let report = tick(&store, &credentials, &factory, clock.as_ref(), &config).await;
        assert_eq!(report.users_processed, 2);
        assert_eq!(report.rows_synced, 2);
    }
}
