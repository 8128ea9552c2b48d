use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{CaptureError, Result};

/// HTTP seam for manifest text and segment payloads, so the resolver and
/// poller can be driven by scripted responses in tests.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes>;
}

/// `reqwest`-backed fetcher shared by the variant resolver and the poller.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::http_status(status, url, "manifest fetch"));
        }
        Ok(response.text().await?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::http_status(status, url, "segment fetch"));
        }
        Ok(response.bytes().await?)
    }
}
