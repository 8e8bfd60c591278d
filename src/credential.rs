//! The on-file credential and the policy that keeps it fresh.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::error::CredentialError;
use crate::store::SessionStore;

/// Access/refresh token pair good until `expiry`. Token material is wrapped
/// in [`Zeroizing`] so it is wiped from memory when the value is dropped.
#[derive(Clone)]
pub struct Credential {
    pub access_token: Zeroizing<String>,
    pub refresh_token: Zeroizing<String>,
    pub expiry: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Zeroizing::new(access_token.into()),
            refresh_token: Zeroizing::new(refresh_token.into()),
            expiry,
        }
    }

    fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expiry - now <= window
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Exchanges a refresh token for a new [`Credential`]. The default
/// `http-capability` feature wires this to a reqwest-backed OAuth2 client;
/// embedders may supply their own.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, CredentialError>;
}

const EXPIRY_THRESHOLD_MINUTES: i64 = 5;

/// Resolves a live, usable [`Credential`] for a user: returns what's on
/// file if it still has more than five minutes left, otherwise refreshes it
/// and persists the result before returning.
pub struct CredentialProvider {
    sessions: Arc<dyn SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
}

impl CredentialProvider {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            refresher,
            clock,
        }
    }

    /// The credential a remote capability should use right now for
    /// `user_id`, refreshing it first if it is within the expiry threshold.
    pub async fn credential_for(&self, user_id: &str) -> Result<Credential, CredentialError> {
        let on_file = self
            .sessions
            .get(user_id)
            .map_err(CredentialError::SessionStore)?
            .ok_or(CredentialError::NoCredential)?;

        let now = self.clock.now();
        if !on_file.expires_within(Duration::minutes(EXPIRY_THRESHOLD_MINUTES), now) {
            return Ok(on_file);
        }

        if on_file.refresh_token.is_empty() {
            return Err(CredentialError::NoRefreshToken);
        }

        let refreshed = self.refresher.refresh(&on_file.refresh_token).await?;
        self.sessions
            .put(user_id, &refreshed)
            .map_err(CredentialError::SessionStore)?;
        Ok(refreshed)
    }

    /// Called after a remote capability call returns successfully: if the
    /// capability's own `currentCredential()` no longer matches what's on
    /// file (some other process refreshed it first), persist the one the
    /// capability actually used so the next read doesn't race it.
    pub fn reconcile(
        &self,
        user_id: &str,
        used: &Credential,
    ) -> Result<(), CredentialError> {
        let on_file = self
            .sessions
            .get(user_id)
            .map_err(CredentialError::SessionStore)?;
        let stale = match &on_file {
            Some(existing) => existing.access_token.as_str() != used.access_token.as_str(),
            None => true,
        };
        if stale {
            self.sessions
                .put(user_id, used)
                .map_err(CredentialError::SessionStore)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::store::SqliteSessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<Credential, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credential::new(
                "new-access",
                "new-refresh",
                Utc::now() + Duration::hours(1),
            ))
        }
    }

    #[tokio::test]
    async fn fresh_credential_is_returned_without_refresh() {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::open(":memory:").unwrap());
        let now = Utc::now();
        sessions
            .put("u1", &Credential::new("a", "r", now + Duration::hours(1)))
            .unwrap();
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(FakeClock::new(now));
        let provider = CredentialProvider::new(sessions, refresher.clone(), clock);

        let cred = provider.credential_for("u1").await.unwrap();
        assert_eq!(cred.access_token.as_str(), "a");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn near_expiry_credential_is_refreshed_and_persisted() {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::open(":memory:").unwrap());
        let now = Utc::now();
        sessions
            .put("u1", &Credential::new("a", "r", now + Duration::minutes(2)))
            .unwrap();
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(FakeClock::new(now));
        let provider = CredentialProvider::new(sessions.clone(), refresher.clone(), clock);

        let cred = provider.credential_for("u1").await.unwrap();
        assert_eq!(cred.access_token.as_str(), "new-access");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let persisted = sessions.get("u1").unwrap().unwrap();
        assert_eq!(persisted.access_token.as_str(), "new-access");
    }

    #[tokio::test]
    async fn missing_credential_is_an_error() {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::open(":memory:").unwrap());
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let provider = CredentialProvider::new(sessions, refresher, clock);

        let err = provider.credential_for("nobody").await.unwrap_err();
        assert!(matches!(err, CredentialError::NoCredential));
    }

    #[tokio::test]
    async fn reconcile_persists_capability_supplied_credential_on_mismatch() {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::open(":memory:").unwrap());
        let now = Utc::now();
        sessions
            .put("u1", &Credential::new("stale", "r", now + Duration::hours(1)))
            .unwrap();
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(FakeClock::new(now));
        let provider = CredentialProvider::new(sessions.clone(), refresher, clock);

        let used_elsewhere = Credential::new("fresher", "r2", now + Duration::hours(2));
        provider.reconcile("u1", &used_elsewhere).unwrap();

        let persisted = sessions.get("u1").unwrap().unwrap();
        assert_eq!(persisted.access_token.as_str(), "fresher");
    }

    mockall::mock! {
        Upstream {}

        #[async_trait]
        impl TokenRefresher for Upstream {
            async fn refresh(&self, refresh_token: &str) -> Result<Credential, CredentialError>;
        }
    }

    #[tokio::test]
    async fn near_expiry_credential_surfaces_upstream_refresh_failure() {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::open(":memory:").unwrap());
        let now = Utc::now();
        sessions
            .put("u1", &Credential::new("a", "r", now + Duration::minutes(1)))
            .unwrap();

        let mut upstream = MockUpstream::new();
        upstream
            .expect_refresh()
            .withf(|token| token == "r")
            .times(1)
            .returning(|_| {
                Err(CredentialError::TokenRefreshFailed(
                    "upstream rejected the refresh token".into(),
                ))
            });

        let clock = Arc::new(FakeClock::new(now));
        let provider = CredentialProvider::new(sessions.clone(), Arc::new(upstream), clock);

        let err = provider.credential_for("u1").await.unwrap_err();
        assert!(matches!(err, CredentialError::TokenRefreshFailed(_)));
        // The stale credential must not have been touched.
        let persisted = sessions.get("u1").unwrap().unwrap();
        assert_eq!(persisted.access_token.as_str(), "a");
    }
}
