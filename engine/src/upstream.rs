//! Upstream HTTP probes.
//!
//! The reconciler touches third-party infrastructure in exactly three ways:
//! a HEAD existence probe of a download URL, a GET of a checksum manifest,
//! and a Last-Modified lookup. They sit behind a trait so the engine can be
//! exercised offline.

use async_trait::async_trait;

use warden_core::{Result, WardenError};

/// Outbound probes against upstream image infrastructure.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// HEAD the URL and return the raw status code without following
    /// redirects (a 302 from a mirror selector counts as reachable).
    async fn head_status(&self, url: &str) -> Result<u16>;

    /// Fetch a text document (checksum manifest).
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// Return the raw `Last-Modified` header after following redirects.
    async fn last_modified(&self, url: &str) -> Result<Option<String>>;
}

/// Production implementation over reqwest.
pub struct HttpUpstream {
    /// Redirects disabled, for the HEAD probe.
    direct: reqwest::Client,
    /// Redirects enabled, for manifests and header lookups.
    following: reqwest::Client,
}

impl HttpUpstream {
    pub fn new() -> Self {
        Self {
            direct: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
            following: reqwest::Client::new(),
        }
    }
}

impl Default for HttpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn head_status(&self, url: &str) -> Result<u16> {
        let response = self
            .direct
            .head(url)
            .send()
            .await
            .map_err(|e| WardenError::HttpError {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(response.status().as_u16())
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .following
            .get(url)
            .send()
            .await
            .map_err(|e| WardenError::HttpError {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(WardenError::HttpError {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        response.text().await.map_err(|e| WardenError::HttpError {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn last_modified(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .following
            .head(url)
            .send()
            .await
            .map_err(|e| WardenError::HttpError {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
