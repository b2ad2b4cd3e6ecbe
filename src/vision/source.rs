//! Frame sources

use std::time::Duration;

use async_trait::async_trait;

use super::frame::RawFrame;
use crate::{Error, Result};

/// Produces raw frames on demand
#[async_trait]
pub trait FrameSource: Send {
    /// Capture the current frame
    async fn capture(&mut self) -> Result<RawFrame>;
}

/// Polls a still-image endpoint (e.g. a camera's snapshot URL)
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    /// Create a source fetching `url`, each request bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    async fn capture(&mut self) -> Result<RawFrame> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = %status, body = %body, "snapshot endpoint error");
            return Err(Error::Frame(format!("snapshot endpoint returned {status}")));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Frame("snapshot endpoint returned no data".to_string()));
        }

        let pixels = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| Error::Frame(format!("snapshot decode task failed: {e}")))??
            .to_rgb8();

        Ok(RawFrame::new(pixels))
    }
}
