//! The shared replication procedure driven by the Sync Worker, the
//! Immediate Sync path, and nothing else: every push of local changes to
//! the remote goes through here.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capability::RemoteCapabilityFactory;
use crate::clock::Clock;
use crate::credential::CredentialProvider;
use crate::error::{CapabilityErrorKind, CredentialError};
use crate::model::PendingRow;
use crate::store::NoteStore;

/// Outcome of one [`sync_batch`] call, for telemetry and tests.
#[derive(Debug, Default, Clone)]
pub struct SyncBatchOutcome {
    pub synced: Vec<String>,
    pub failed: Vec<String>,
    /// True if the batch stopped early because the credential was found to
    /// be expired partway through.
    pub aborted_on_credential_expiry: bool,
}

const CREDENTIAL_EXPIRED_REASON: &str = "credential expired";
const AUTHENTICATION_UNAVAILABLE_REASON: &str = "authentication unavailable";

/// Replicate `rows` (all belonging to `user_id`) to the remote.
///
/// Deletes are attempted before upserts, per row in arrival order within
/// each group. A `CredentialExpired` response stops the batch immediately:
/// the triggering row and every row not yet attempted (in either partition)
/// are marked failed with reason `"credential expired"` before returning.
/// Every other failure marks just that row failed/abandoned and the batch
/// continues.
pub async fn sync_batch(
    store: &NoteStore,
    credentials: &CredentialProvider,
    capability_factory: &dyn RemoteCapabilityFactory,
    clock: &dyn Clock,
    max_retries: u32,
    user_id: &str,
    rows: Vec<PendingRow>,
) -> SyncBatchOutcome {
    let mut outcome = SyncBatchOutcome::default();
    if rows.is_empty() {
        return outcome;
    }

    let credential = match credentials.credential_for(user_id).await {
        Ok(c) => c,
        Err(err) => {
            warn!(user_id, error = %err, "could not acquire credential, failing batch");
            let now = clock.now();
            for row in &rows {
                let _ = store.mark_sync_failed(
                    &row.id,
                    AUTHENTICATION_UNAVAILABLE_REASON,
                    max_retries,
                    now,
                );
                outcome.failed.push(row.id.clone());
            }
            return outcome;
        }
    };

    let capability = capability_factory.build(user_id, credential);

    let (deletes, upserts): (Vec<PendingRow>, Vec<PendingRow>) =
        rows.into_iter().partition(|row| row.deleted);

    let mut rows = deletes.into_iter().chain(upserts.into_iter());

    while let Some(row) = rows.next() {
        let now = clock.now();
        if let Err(e) = store.mark_syncing(&row.id, now) {
            warn!(note_id = %row.id, error = %e, "failed to mark row syncing");
            continue;
        }

        let result = if row.deleted {
            capability
                .delete_note(&row.context, &row.date)
                .await
                .map(|_| None)
        } else {
            capability
                .upsert_note(&row.context, &row.date, &row.content)
                .await
                .map(Some)
        };

        match result {
            Ok(remote_id) => {
                let now = clock.now();
                if row.deleted {
                    let _ = store.hard_delete(&row.user_id, &row.context, &row.date);
                } else {
                    let remote_id = remote_id.unwrap_or_default();
                    let _ = store.mark_synced(&row.id, &remote_id, now);
                }
                outcome.synced.push(row.id.clone());
                debug!(note_id = %row.id, "row synced");
            }
            Err(e) => {
                let credential_expired = e.kind == CapabilityErrorKind::CredentialExpired;
                let reason = if credential_expired {
                    CREDENTIAL_EXPIRED_REASON.to_string()
                } else {
                    e.message
                };
                let now = clock.now();
                let _ = store.mark_sync_failed(&row.id, &reason, max_retries, now);
                outcome.failed.push(row.id.clone());

                if credential_expired {
                    warn!(user_id, note_id = %row.id, "credential expired mid-batch, aborting");
                    outcome.aborted_on_credential_expiry = true;

                    // Step 5: every row not yet attempted (in either
                    // partition) is marked failed for the same reason, not
                    // left untouched for the next tick.
                    for remaining in rows.by_ref() {
                        let now = clock.now();
                        let _ = store.mark_sync_failed(
                            &remaining.id,
                            CREDENTIAL_EXPIRED_REASON,
                            max_retries,
                            now,
                        );
                        outcome.failed.push(remaining.id.clone());
                    }
                    break;
                }
            }
        }
    }

    if let Err(e) = credentials.reconcile(user_id, capability.current_credential()) {
        warn!(user_id, error = %e, "credential reconciliation failed");
    }

    outcome
}
