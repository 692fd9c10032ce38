//! Object storage over HTTP.
//!
//! Fetches uploads from a bucket exposed as
//! `{base_url}/object/{bucket}/{path}`, authenticated with a bearer key.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use invoq_core::defaults::{STORAGE_BUCKET, STORAGE_TIMEOUT_SECS};
use invoq_core::{DocumentFetcher, Error, Result};

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    pub base_url: String,
    pub bucket: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl HttpStorageConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bucket: STORAGE_BUCKET.to_string(),
            api_key: None,
            timeout_seconds: STORAGE_TIMEOUT_SECS,
        }
    }

    /// Read `STORAGE_URL`, `STORAGE_BUCKET`, `STORAGE_KEY`, and
    /// `STORAGE_TIMEOUT_SECS`. Returns `None` when `STORAGE_URL` is unset.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("STORAGE_URL").ok()?;
        Some(Self {
            base_url,
            bucket: std::env::var("STORAGE_BUCKET").unwrap_or_else(|_| STORAGE_BUCKET.to_string()),
            api_key: std::env::var("STORAGE_KEY").ok(),
            timeout_seconds: std::env::var("STORAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(STORAGE_TIMEOUT_SECS),
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// [`DocumentFetcher`] downloading from an HTTP object store.
pub struct HttpFetcher {
    client: Client,
    config: HttpStorageConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpStorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Storage(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "store",
            component = "http_fetcher",
            url = %config.base_url,
            bucket = %config.bucket,
            "Initializing object storage fetcher"
        );

        Ok(Self { client, config })
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        if path.trim().is_empty() {
            return Err(Error::InvalidInput("empty document path".to_string()));
        }

        let mut req = self.client.get(self.object_url(path));
        if let Some(ref key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Download failed for {}: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::InvalidInput(format!("document not found: {}", path)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "Object storage returned {} for {}: {}",
                status, path, body
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("Failed to read body for {}: {}", path, e)))?;

        debug!(
            subsystem = "store",
            component = "http_fetcher",
            storage_path = %path,
            size = bytes.len(),
            "Document downloaded"
        );
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let fetcher = HttpFetcher::new(
            HttpStorageConfig::new("https://storage.example.com/v1/").with_bucket("uploads"),
        )
        .unwrap();
        assert_eq!(
            fetcher.object_url("/2026/inv.pdf"),
            "https://storage.example.com/v1/object/uploads/2026/inv.pdf"
        );
    }

    #[test]
    fn test_default_bucket() {
        let config = HttpStorageConfig::new("http://localhost");
        assert_eq!(config.bucket, "invoices");
        assert!(config.api_key.is_none());
    }
}
