//! Streaming artifact download.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ArtifactDownloader, ArtifactLocator, DownloadError};

/// Downloads artifacts over HTTP, chunk by chunk, straight to disk.
#[derive(Clone)]
pub struct HttpArtifactDownloader {
    inner: reqwest::Client,
}

impl HttpArtifactDownloader {
    /// A whole download, body included, gives up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner })
    }

    async fn stream_to(
        &self,
        locator: &ArtifactLocator,
        dest: &Path,
    ) -> Result<u64, DownloadError> {
        let mut response = self.inner.get(locator.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl ArtifactDownloader for HttpArtifactDownloader {
    async fn fetch(&self, locator: &ArtifactLocator, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(url = %locator.as_str(), dest = %dest.display(), "Downloading artifact");

        match self.stream_to(locator, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                if tokio::fs::remove_file(dest).await.is_ok() {
                    warn!(dest = %dest.display(), "Removed partial download");
                }
                Err(e)
            }
        }
    }
}
