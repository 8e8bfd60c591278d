//! Default [`TokenRefresher`], gated behind the `http-capability` feature:
//! a plain OAuth2 refresh-token grant against a configurable token endpoint.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::credential::{Credential, TokenRefresher};
use crate::error::CredentialError;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Exchanges a refresh token for a new access token against `token_url`
/// using `client_id` (public client, no secret — matches the provider
/// this core was built against).
pub struct HttpTokenRefresher {
    client: Client,
    token_url: String,
    client_id: String,
}

impl HttpTokenRefresher {
    pub fn new(client: Client, token_url: String, client_id: String) -> Self {
        Self {
            client,
            token_url,
            client_id,
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, CredentialError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::TokenRefreshFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::TokenRefreshFailed(format!(
                "{status}: {body}"
            )));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError::TokenRefreshFailed(e.to_string()))?;

        let new_refresh_token = parsed.refresh_token.unwrap_or_else(|| refresh_token.to_string());
        Ok(Credential::new(
            parsed.access_token,
            new_refresh_token,
            Utc::now() + Duration::seconds(parsed.expires_in),
        ))
    }
}
