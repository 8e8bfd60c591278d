//! The abstract boundary to a user's remote object store.

use async_trait::async_trait;

use crate::credential::Credential;
use crate::error::CapabilityError;

/// One note as the remote side sees it: content plus the local date it maps
/// to, reconstructed from the remote file name.
#[derive(Debug, Clone)]
pub struct RemoteNote {
    pub context: String,
    pub date: String,
    pub content: String,
}

/// A context as it exists on the remote, as reported alongside
/// [`RemoteConfig`] so the bulk importer can discover it without first
/// having a local copy.
#[derive(Debug, Clone)]
pub struct RemoteContext {
    pub name: String,
    pub color: Option<String>,
}

/// Per-user configuration read from the remote before the bulk importer can
/// enumerate anything: the storage root and the set of contexts that exist.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub root_path: String,
    pub contexts: Vec<RemoteContext>,
}

/// A per-user cloud object store, addressed by `(context, date)` rather
/// than an opaque id. One instance is built fresh per [`crate::sync_batch::sync_batch`]
/// call, scoped to a single user and a single credential.
///
/// Implementors classify every failure into one of the three
/// [`crate::error::CapabilityErrorKind`] variants; callers never inspect
/// anything more specific than that.
#[async_trait]
pub trait RemoteCapability: Send + Sync {
    async fn upsert_note(
        &self,
        context: &str,
        date: &str,
        content: &str,
    ) -> Result<String, CapabilityError>;

    async fn delete_note(&self, context: &str, date: &str) -> Result<(), CapabilityError>;

    async fn get_all_notes_in_context(
        &self,
        context: &str,
    ) -> Result<Vec<RemoteNote>, CapabilityError>;

    async fn get_config(&self) -> Result<RemoteConfig, CapabilityError>;

    /// Remove tombstone markers the remote side keeps for deletions older
    /// than its own retention window. Best-effort: failures here should
    /// never fail the batch that triggered them.
    async fn cleanup_old_deletions(&self) -> Result<(), CapabilityError>;

    /// The credential this capability instance is actually using. May
    /// differ from what was passed in at construction if the underlying
    /// transport refreshed it independently; [`crate::credential::CredentialProvider::reconcile`]
    /// uses this to avoid a stale-credential race on the next call.
    fn current_credential(&self) -> &Credential;
}

/// Builds a [`RemoteCapability`] scoped to one user and credential. The
/// Sync Worker, Immediate Sync path, and Bulk Importer all go through this
/// rather than constructing a capability directly, so tests can substitute
/// a fake.
pub trait RemoteCapabilityFactory: Send + Sync {
    fn build(&self, user_id: &str, credential: Credential) -> Box<dyn RemoteCapability>;
}

impl<F> RemoteCapabilityFactory for F
where
    F: Fn(&str, Credential) -> Box<dyn RemoteCapability> + Send + Sync,
{
    fn build(&self, user_id: &str, credential: Credential) -> Box<dyn RemoteCapability> {
        self(user_id, credential)
    }
}
