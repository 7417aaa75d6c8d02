//! HTTP client for the credential renewal endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::auth::Credential;

use super::ApiError;

/// Backend that can exchange a live credential for a fresh one.
///
/// The renewer only depends on this seam; [`ApiClient`] is the production
/// implementation.
#[async_trait]
pub trait RenewalBackend: Send + Sync {
    async fn refresh_token(
        &self,
        subject_id: &str,
        credential: &Credential,
    ) -> Result<Credential, ApiError>;
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// API client for the book-discovery backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())
            .with_context(|| format!("Invalid backend URL: {}", base_url.as_ref()))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Backend URL cannot be a base: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Subject ids go in as a single path segment, percent-encoded
    fn refresh_url(&self, subject_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "v1", "user", subject_id, "refreshToken"]);
        }
        url
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl RenewalBackend for ApiClient {
    async fn refresh_token(
        &self,
        subject_id: &str,
        credential: &Credential,
    ) -> Result<Credential, ApiError> {
        let url = self.refresh_url(subject_id);
        debug!(%url, "Requesting credential renewal");

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(credential.as_str())
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        let parsed: RefreshResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("refresh body: {}", e)))?;

        if parsed.token.is_empty() {
            return Err(ApiError::InvalidResponse("empty token".to_string()));
        }
        Ok(Credential::new(parsed.token))
    }
}
