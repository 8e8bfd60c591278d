//! Default HTTP-backed [`RemoteCapability`], gated behind the
//! `http-capability` feature. Talks to a REST object-store front end:
//! `PUT`/`GET`/`DELETE` against `<root>/<context>/<DD-MM-YYYY>.md`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::capability::{RemoteCapability, RemoteCapabilityFactory, RemoteConfig, RemoteNote};
use crate::credential::Credential;
use crate::error::{CapabilityError, CapabilityErrorKind};
use crate::remote_naming;

/// Substrings that mean "the access token is no longer good", taken from
/// the handful of providers known to phrase it differently. Checked before
/// falling back to a status-code based Transient/Permanent split.
const CREDENTIAL_EXPIRED_MARKERS: &[&str] = &[
    "token expired",
    "token has been expired",
    "invalid_grant",
    "invalid_token",
];

fn classify(status: StatusCode, body: &str) -> CapabilityErrorKind {
    let lower = body.to_lowercase();
    if status == StatusCode::UNAUTHORIZED
        || CREDENTIAL_EXPIRED_MARKERS.iter().any(|m| lower.contains(m))
    {
        return CapabilityErrorKind::CredentialExpired;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return CapabilityErrorKind::Transient;
    }
    CapabilityErrorKind::Permanent
}

fn network_error(err: reqwest::Error) -> CapabilityError {
    if err.is_timeout() || err.is_connect() {
        CapabilityError::transient(err.to_string())
    } else {
        CapabilityError::permanent(err.to_string())
    }
}

/// One user's object store, reached over HTTP with a fixed bearer token.
pub struct HttpRemoteCapability {
    client: Client,
    root_path: String,
    credential: Credential,
}

impl HttpRemoteCapability {
    pub fn new(client: Client, root_path: String, credential: Credential) -> Self {
        Self {
            client,
            root_path,
            credential,
        }
    }

    fn object_url(&self, context: &str, date: &str) -> Option<String> {
        let stem = remote_naming::to_remote_file_stem(date)?;
        Some(format!("{}/{}/{}.md", self.root_path, context, stem))
    }
}

#[async_trait]
impl RemoteCapability for HttpRemoteCapability {
    async fn upsert_note(
        &self,
        context: &str,
        date: &str,
        content: &str,
    ) -> Result<String, CapabilityError> {
        let url = self
            .object_url(context, date)
            .ok_or_else(|| CapabilityError::permanent(format!("unparseable date: {date}")))?;

        let resp = self
            .client
            .put(&url)
            .bearer_auth(self.credential.access_token.as_str())
            .body(content.to_string())
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::new(
                format!("upsert_note failed with {status}: {body}"),
                classify(status, &body),
            ));
        }
        Ok(url)
    }

    async fn delete_note(&self, context: &str, date: &str) -> Result<(), CapabilityError> {
        let url = self
            .object_url(context, date)
            .ok_or_else(|| CapabilityError::permanent(format!("unparseable date: {date}")))?;

        let resp = self
            .client
            .delete(&url)
            .bearer_auth(self.credential.access_token.as_str())
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::new(
                format!("delete_note failed with {status}: {body}"),
                classify(status, &body),
            ));
        }
        Ok(())
    }

    async fn get_all_notes_in_context(
        &self,
        context: &str,
    ) -> Result<Vec<RemoteNote>, CapabilityError> {
        let url = format!("{}/{}/", self.root_path, context);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.credential.access_token.as_str())
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::new(
                format!("get_all_notes_in_context failed with {status}: {body}"),
                classify(status, &body),
            ));
        }

        let listing: Vec<RemoteFileEntry> = resp.json().await.map_err(|e| {
            CapabilityError::permanent(format!("malformed listing response: {e}"))
        })?;

        Ok(listing
            .into_iter()
            .filter_map(|entry| {
                let stem = remote_naming::strip_md_extension(&entry.name);
                let date = remote_naming::from_remote_file_stem(stem)?;
                Some(RemoteNote {
                    context: context.to_string(),
                    date,
                    content: entry.content,
                })
            })
            .collect())
    }

    async fn get_config(&self) -> Result<RemoteConfig, CapabilityError> {
        let url = format!("{}/config.json", self.root_path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.credential.access_token.as_str())
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::new(
                format!("get_config failed with {status}: {body}"),
                classify(status, &body),
            ));
        }

        let parsed: RemoteConfigResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::permanent(format!("malformed config response: {e}")))?;

        Ok(RemoteConfig {
            root_path: self.root_path.clone(),
            contexts: parsed
                .contexts
                .into_iter()
                .map(|c| crate::capability::RemoteContext {
                    name: c.name,
                    color: c.color,
                })
                .collect(),
        })
    }

    async fn cleanup_old_deletions(&self) -> Result<(), CapabilityError> {
        let url = format!("{}/.trash/cleanup", self.root_path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.credential.access_token.as_str())
            .send()
            .await
            .map_err(network_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::new(
                format!("cleanup_old_deletions failed with {status}: {body}"),
                classify(status, &body),
            ));
        }
        Ok(())
    }

    fn current_credential(&self) -> &Credential {
        &self.credential
    }
}

#[derive(serde::Deserialize)]
struct RemoteFileEntry {
    name: String,
    content: String,
}

#[derive(serde::Deserialize)]
struct RemoteConfigResponse {
    contexts: Vec<RemoteContextResponse>,
}

#[derive(serde::Deserialize)]
struct RemoteContextResponse {
    name: String,
    color: Option<String>,
}

/// Builds an [`HttpRemoteCapability`] per call, cloning the underlying
/// reqwest client (cheap — it's an `Arc` internally).
pub struct HttpRemoteCapabilityFactory {
    client: Client,
    root_path: String,
}

impl HttpRemoteCapabilityFactory {
    pub fn new(client: Client, root_path: String) -> Self {
        Self { client, root_path }
    }
}

impl RemoteCapabilityFactory for HttpRemoteCapabilityFactory {
    fn build(&self, _user_id: &str, credential: Credential) -> Box<dyn RemoteCapability> {
        Box::new(HttpRemoteCapability::new(
            self.client.clone(),
            self.root_path.clone(),
            credential,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unauthorized_as_credential_expired() {
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, "irrelevant"),
            CapabilityErrorKind::CredentialExpired
        );
    }

    #[test]
    fn classifies_invalid_grant_body_as_credential_expired_even_on_400() {
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "error: invalid_grant"),
            CapabilityErrorKind::CredentialExpired
        );
    }

    #[test]
    fn classifies_server_error_as_transient() {
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, ""),
            CapabilityErrorKind::Transient
        );
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            CapabilityErrorKind::Transient
        );
    }

    #[test]
    fn classifies_other_client_errors_as_permanent() {
        assert_eq!(
            classify(StatusCode::NOT_FOUND, ""),
            CapabilityErrorKind::Permanent
        );
    }
}
