//! Local disk tier.
//!
//! Layout under the configured root:
//!
//! ```text
//! {root}/metadata.json                 address → IndexRecord
//! {root}/files/{hex[0..2]}/{hex}.bin   object bytes
//! ```
//!
//! `metadata.json` is rewritten wholesale on every write. Writers inside one
//! process are serialized; separate processes must not write concurrently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::address::{content_address, ContentAddress};
use crate::error::{InftError, InftResult};

const INDEX_FILE: &str = "metadata.json";
const FILES_DIR: &str = "files";
const CONTENT_TYPE: &str = "application/octet-stream";

// ═══════════════════════════════════════════════════════════════════════════════
// INDEX TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a locally stored object came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_address: Option<ContentAddress>,
}

impl Provenance {
    /// Object written locally because the remote tier could not take it.
    pub fn fallback(reason: impl Into<String>, remote_error: Option<String>) -> Self {
        Self {
            fallback_reason: Some(reason.into()),
            remote_error,
            ..Default::default()
        }
    }

    /// Object copied down after a successful remote read.
    pub fn cached_from_remote(original: ContentAddress) -> Self {
        Self {
            source: Some("cached-from-remote".to_string()),
            cached_at: Some(Utc::now()),
            original_address: Some(original),
            ..Default::default()
        }
    }
}

/// One entry of `metadata.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    /// Object path relative to the store root. Never used to locate the
    /// object; see [`LocalStore::object_path`].
    pub file_path: String,
    pub content_type: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

type Index = BTreeMap<String, IndexRecord>;

/// Outcome of [`LocalStore::put`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalPut {
    pub address: ContentAddress,
    /// The object was already on disk and nothing was written.
    pub already_present: bool,
    pub size: u64,
}

/// Totals from an age-based purge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub freed_bytes: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Content-addressed object store on the local filesystem.
pub struct LocalStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist.
    pub async fn ensure_root(&self) -> InftResult<()> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            fs::create_dir_all(&self.root).await?;
            info!("Created local storage directory: {}", self.root.display());
        }
        Ok(())
    }

    /// Path of the object file for `address`.
    pub fn object_path(&self, address: &ContentAddress) -> PathBuf {
        let hex = address.to_hex();
        self.root
            .join(FILES_DIR)
            .join(&hex[..2])
            .join(format!("{hex}.bin"))
    }

    pub async fn exists(&self, address: &ContentAddress) -> bool {
        fs::try_exists(self.object_path(address))
            .await
            .unwrap_or(false)
    }

    /// Store `data` under its content address. Storing bytes that are already
    /// present is a no-op.
    pub async fn put(&self, data: &[u8], provenance: Provenance) -> InftResult<LocalPut> {
        let address = content_address(data);
        let path = self.object_path(&address);
        let size = data.len() as u64;

        let _guard = self.index_lock.lock().await;

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Object already exists locally: {}", address.short());
            return Ok(LocalPut {
                address,
                already_present: true,
                size,
            });
        }

        write_atomic(&path, data).await?;

        let mut index = self.load_index().await;
        index.insert(
            address.to_hex(),
            IndexRecord {
                size,
                timestamp: Utc::now(),
                file_path: self.relative(&path),
                content_type: CONTENT_TYPE.to_string(),
                provenance,
            },
        );
        if let Err(e) = self.save_index(&index).await {
            warn!("Failed to save local index: {}", e);
        }

        info!("Stored {} bytes locally: {}", size, address.short());

        Ok(LocalPut {
            address,
            already_present: false,
            size,
        })
    }

    /// Read the object stored under `address`.
    pub async fn get(&self, address: &ContentAddress) -> InftResult<Vec<u8>> {
        let path = self.object_path(address);
        match fs::read(&path).await {
            Ok(data) => {
                debug!("Read {} bytes from local storage: {}", data.len(), address.short());
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(InftError::NotFound(
                format!("{address} not found locally"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Index entry for `address`, if any.
    pub async fn record(&self, address: &ContentAddress) -> Option<IndexRecord> {
        self.load_index().await.remove(&address.to_hex())
    }

    /// Delete objects whose index timestamp is older than `max_age_days`.
    pub async fn cleanup(&self, max_age_days: u32) -> InftResult<CleanupReport> {
        self.cleanup_before(Utc::now() - Duration::days(i64::from(max_age_days)))
            .await
    }

    /// Delete objects whose index timestamp is older than `cutoff`.
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> InftResult<CleanupReport> {
        let _guard = self.index_lock.lock().await;

        let mut index = self.load_index().await;
        let mut report = CleanupReport::default();

        let expired: Vec<String> = index
            .iter()
            .filter(|(_, record)| record.timestamp < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            let Some(record) = index.get(&key) else {
                continue;
            };
            // The stored file path is informational; the object path is
            // always rebuilt from the address.
            let Ok(address) = key.parse::<ContentAddress>() else {
                warn!("Skipping index entry with malformed address: {}", key);
                continue;
            };
            let path = self.object_path(&address);

            if fs::try_exists(&path).await.unwrap_or(false) {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!("Failed to delete old object {}: {}", key, e);
                    continue;
                }
                report.deleted_count += 1;
                report.freed_bytes += record.size;
            }
            index.remove(&key);
        }

        self.save_index(&index).await?;

        info!(
            "Cleanup completed: deleted {} objects, freed {} bytes",
            report.deleted_count, report.freed_bytes
        );

        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INDEX HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    async fn load_index(&self) -> Index {
        let bytes = match fs::read(self.index_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Index::new(),
            Err(e) => {
                warn!("Failed to read local index, starting fresh: {}", e);
                return Index::new();
            }
        };

        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("Failed to parse local index, starting fresh: {}", e);
            Index::new()
        })
    }

    async fn save_index(&self, index: &Index) -> InftResult<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path(), &bytes).await
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

/// Write to a temporary sibling, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> InftResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("object");
    let suffix: u64 = rand::thread_rng().gen();
    let temp_path = path.with_file_name(format!(".{file_name}.{suffix:016x}.tmp"));

    fs::write(&temp_path, bytes).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}
