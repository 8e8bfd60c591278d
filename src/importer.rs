//! The Bulk Importer: one-shot hydration of a brand-new local database from
//! whatever a user already has on the remote, run once at first login.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capability::RemoteCapabilityFactory;
use crate::clock::Clock;
use crate::credential::CredentialProvider;
use crate::store::NoteStore;

/// Tally of what a bulk import actually did, for logging and tests.
#[derive(Debug, Default, Clone)]
pub struct ImportReport {
    pub contexts_created: usize,
    pub notes_imported: usize,
    pub notes_skipped_unparseable: usize,
}

/// Hydrate `user_id`'s local database from the remote: fetch its config
/// (which lists its contexts), then every note in every context, inserting
/// each with `mark_pending = false` since it already matches the remote.
///
/// Only meaningful the first time a user's local database has no contexts
/// yet — callers are expected to check that before invoking this (importing
/// onto an existing database would silently no-op on every note that
/// already has a local row, since `upsertNote` treats deleted rows as
/// tombstones and leaves existing live rows' sync state alone).
pub fn import_on_login(
    store: NoteStore,
    credentials: Arc<CredentialProvider>,
    capability_factory: Arc<dyn RemoteCapabilityFactory>,
    clock: Arc<dyn Clock>,
    user_id: String,
) -> JoinHandle<ImportReport> {
    tokio::spawn(async move {
        let mut report = ImportReport::default();

        let credential = match credentials.credential_for(&user_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id, error = %e, "bulk import could not acquire credential");
                return report;
            }
        };
        let capability = capability_factory.build(&user_id, credential);

        let config = match capability.get_config().await {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id, error = %e, "bulk import could not fetch remote config");
                return report;
            }
        };

        let now = clock.now();
        for context in &config.contexts {
            if let Err(e) =
                store.create_context_if_missing(&user_id, &context.name, context.color.as_deref(), now)
            {
                warn!(user_id, context = %context.name, error = %e, "failed to create context locally");
                continue;
            }
            report.contexts_created += 1;

            let notes = match capability.get_all_notes_in_context(&context.name).await {
                Ok(notes) => notes,
                Err(e) => {
                    warn!(user_id, context = %context.name, error = %e, "failed to list remote notes");
                    continue;
                }
            };

            for remote_note in notes {
                match store.upsert_note(
                    &user_id,
                    &context.name,
                    &remote_note.date,
                    &remote_note.content,
                    false,
                    now,
                ) {
                    Ok(_) => report.notes_imported += 1,
                    Err(e) => {
                        warn!(user_id, context = %context.name, date = %remote_note.date, error = %e, "failed to import note");
                        report.notes_skipped_unparseable += 1;
                    }
                }
            }
        }

        if let Err(e) = credentials.reconcile(&user_id, capability.current_credential()) {
            warn!(user_id, error = %e, "credential reconciliation failed after import");
        }

        info!(
            user_id,
            contexts = report.contexts_created,
            notes = report.notes_imported,
            skipped = report.notes_skipped_unparseable,
            "bulk import complete"
        );
        report
    })
}
