//! The Immediate Sync Path: a fast, best-effort push of a single row right
//! after a write, so a user on a live connection doesn't have to wait for
//! the next worker tick.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::capability::RemoteCapabilityFactory;
use crate::clock::Clock;
use crate::config::Config;
use crate::credential::CredentialProvider;
use crate::model::PendingRow;
use crate::store::NoteStore;
use crate::sync_batch::{sync_batch, SyncBatchOutcome};

/// Fire off a one-row replication attempt for `note_id` in the background.
/// Returns a handle rather than truly detaching so callers (tests, graceful
/// shutdown) can await it; production call sites are free to drop it.
pub fn spawn_immediate_sync(
    store: NoteStore,
    credentials: Arc<CredentialProvider>,
    capability_factory: Arc<dyn RemoteCapabilityFactory>,
    clock: Arc<dyn Clock>,
    config: Config,
    user_id: String,
    note_id: String,
) -> JoinHandle<SyncBatchOutcome> {
    tokio::spawn(async move {
        let row = match store.get_by_id(&note_id) {
            Ok(Some(note)) if note.sync_pending => PendingRow::from(&note),
            Ok(_) => {
                debug!(note_id, "immediate sync found nothing pending, skipping");
                return SyncBatchOutcome::default();
            }
            Err(e) => {
                debug!(note_id, error = %e, "immediate sync could not load row");
                return SyncBatchOutcome::default();
            }
        };

        sync_batch(
            &store,
            credentials.as_ref(),
            capability_factory.as_ref(),
            clock.as_ref(),
            config.max_retries,
            &user_id,
            vec![row],
        )
        .await
    })
}
