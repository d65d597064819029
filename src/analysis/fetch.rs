// Image download over HTTP with a hard timeout.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::traits::ImageFetcher;

/// Default bound on a single image download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Refuse anything larger; media CDNs serve stills well under this.
const MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; sentinel/0.1)")
            .timeout(timeout)
            .build()
            .context("Failed to build image HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Image request failed: {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Image download returned {}", response.status());
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_IMAGE_BYTES {
                anyhow::bail!("Image is too large ({len} bytes)");
            }
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read image body")?;

        if bytes.is_empty() {
            anyhow::bail!("Image body was empty");
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            anyhow::bail!("Image is too large ({} bytes)", bytes.len());
        }

        debug!(url = url, bytes = bytes.len(), "Fetched image");
        Ok(bytes.to_vec())
    }
}
