//! Remote storage tier: the storage network's indexer service.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, info};

use super::address::ContentAddress;
use crate::error::{InftError, InftResult};

/// Envelope code the indexer uses for an unknown root.
pub const CODE_FILE_NOT_FOUND: i64 = 101;

/// Remote, content-addressed object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upload `data` whose canonical address is `root`. Returns the
    /// transaction reference of the storage submission.
    async fn upload(&self, data: &[u8], root: &ContentAddress) -> InftResult<String>;

    /// Download the object stored under `root`.
    async fn download(&self, root: &ContentAddress) -> InftResult<Vec<u8>>;
}

/// JSON envelope returned by the indexer for errors and upload results.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<UploadData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadData {
    tx_hash: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEXER CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP client for the storage indexer.
pub struct IndexerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>) -> InftResult<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| InftError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteStore for IndexerClient {
    async fn upload(&self, data: &[u8], root: &ContentAddress) -> InftResult<String> {
        let url = format!("{}/file/upload", self.base_url);
        debug!("Uploading {} bytes to {} (root {})", data.len(), url, root.short());

        let response = self
            .http_client
            .post(&url)
            .query(&[("root", root.to_string())])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| InftError::Transport(format!("upload request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InftError::Transport(format!("upload response unreadable: {e}")))?;

        let envelope: Envelope = serde_json::from_str(&body).map_err(|_| {
            InftError::Transport(format!("upload failed with status {status}: {body}"))
        })?;

        if !status.is_success() || envelope.code != 0 {
            return Err(InftError::Transport(format!(
                "upload error: {}",
                envelope.message.unwrap_or_else(|| format!("HTTP {status}"))
            )));
        }

        let tx_hash = envelope
            .data
            .map(|d| d.tx_hash)
            .ok_or_else(|| InftError::Transport("upload response missing txHash".into()))?;

        info!("Remote upload successful: {}", tx_hash);
        Ok(tx_hash)
    }

    async fn download(&self, root: &ContentAddress) -> InftResult<Vec<u8>> {
        let url = format!("{}/file", self.base_url);
        debug!("Downloading {} from {}", root.short(), url);

        let response = self
            .http_client
            .get(&url)
            .query(&[("root", root.to_string())])
            .send()
            .await
            .map_err(|e| InftError::Transport(format!("download request failed: {e}")))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        let body = response
            .bytes()
            .await
            .map_err(|e| InftError::Transport(format!("download body unreadable: {e}")))?;

        if is_json {
            if let Ok(envelope) = serde_json::from_slice::<Envelope>(&body) {
                if !status.is_success() || envelope.code != 0 {
                    if envelope.code == CODE_FILE_NOT_FOUND {
                        return Err(InftError::NotFound(format!(
                            "{} does not exist in remote storage",
                            root.short()
                        )));
                    }
                    return Err(InftError::Transport(format!(
                        "download failed: {}",
                        envelope.message.unwrap_or_else(|| "unknown error".to_string())
                    )));
                }
            }
        }

        if !status.is_success() {
            return Err(InftError::Transport(format!(
                "download failed with status {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        if body.is_empty() {
            return Err(InftError::Transport("downloaded file is empty".into()));
        }

        info!("Remote download successful, received {} bytes", body.len());
        Ok(body.to_vec())
    }
}
