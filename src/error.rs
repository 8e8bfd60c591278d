//! Error types for every layer of the replication core.

use thiserror::Error;

/// Errors surfaced by the Note Store (C1).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("note not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

/// Classification of a remote-capability failure. The core never tries to
/// tell Transient and Permanent apart beyond this — both are retried the
/// same way, up to the retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// Access credential is expired or revoked; the batch must stop.
    CredentialExpired,
    /// Retriable: network timeouts, 5xx, rate limiting.
    Transient,
    /// Not (knowingly) retriable, but retried anyway until it is abandoned.
    Permanent,
}

/// Error returned by a [`crate::capability::RemoteCapability`] call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
    pub kind: CapabilityErrorKind,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>, kind: CapabilityErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(message, CapabilityErrorKind::Transient)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(message, CapabilityErrorKind::Permanent)
    }

    pub fn credential_expired(message: impl Into<String>) -> Self {
        Self::new(message, CapabilityErrorKind::CredentialExpired)
    }
}

/// Errors from the credential provider / refresher (C3).
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential on file for this user")]
    NoCredential,

    #[error("credential has no refresh token")]
    NoRefreshToken,

    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("session store error: {0}")]
    SessionStore(#[from] StoreError),
}

/// Errors surfaced through the inward interface owned by [`crate::core::Core`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unauthorized: note id does not belong to this user")]
    Unauthorized,
}
