//! Authenticated HTTP client for the room directory service
//!
//! Wraps reqwest::Client with bearer-token injection from the stored config.

use anyhow::{bail, Context, Result};

use crate::config::Config;

/// Authenticated directory-service client.
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl DirectoryClient {
    /// Load config and build the client. Fails early when no valid token is
    /// stored, with guidance to log in.
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        let token = config
            .get_token()
            .context("Not logged in. Run 'rooms-cli login' first.")?;
        if token.is_expired() {
            bail!("Session token expired. Run 'rooms-cli login'.");
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/api", config.server_url()),
            token: token.token,
        })
    }

    /// GET request to the directory service (bearer auth).
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Directory GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Directory GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request to the directory service (bearer auth).
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Directory POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Directory POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// DELETE request to the directory service (bearer auth).
    pub async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Directory DELETE {}", url);

        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Directory DELETE {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'rooms-cli login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
