//! Content-addressed storage with a remote tier and a local disk fallback.
//!
//! Writes go to the remote indexer with bounded retries, each attempt raced
//! against the upload timeout. When every attempt fails and fallback is
//! enabled, the object lands in the local tier instead. Reads prefer the
//! local tier and cache remote hits locally.

mod address;
mod indexer;
mod local;

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

pub use address::{content_address, ContentAddress, CHUNK_SIZE};
pub use indexer::{IndexerClient, RemoteStore, CODE_FILE_NOT_FOUND};
pub use local::{CleanupReport, IndexRecord, LocalPut, LocalStore, Provenance};

use crate::config::{FallbackConfig, FallbackPatch, StorageConfig};
use crate::error::{InftError, InftResult};

/// Provenance reason recorded on objects written by the fallback path.
pub const FALLBACK_REASON: &str = "remote storage unavailable";

const LOCAL_REFERENCE_PREFIX: &str = "local-";

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference to the write that persisted an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionReference {
    /// Storage submission transaction on the remote network.
    Chain(String),
    /// Object written to the local tier only.
    Local(ContentAddress),
}

impl TransactionReference {
    pub fn is_local(&self) -> bool {
        matches!(self, TransactionReference::Local(_))
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionReference::Chain(tx) => f.write_str(tx),
            TransactionReference::Local(address) => {
                write!(f, "{LOCAL_REFERENCE_PREFIX}{}", address.to_hex())
            }
        }
    }
}

impl Serialize for TransactionReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of [`StorageBackend::store`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageResult {
    pub transaction_reference: TransactionReference,
    pub content_address: ContentAddress,
    pub size_bytes: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Two-tier object store.
pub struct StorageBackend {
    remote: Arc<dyn RemoteStore>,
    local: RwLock<Arc<LocalStore>>,
    fallback: RwLock<FallbackConfig>,
    upload_timeout: Duration,
}

impl StorageBackend {
    /// Build a backend talking to the indexer named in `config`.
    pub async fn connect(config: &StorageConfig) -> InftResult<Self> {
        let remote = Arc::new(IndexerClient::new(&config.indexer_url)?);
        Self::new(remote, config.fallback.clone(), config.upload_timeout).await
    }

    /// Build a backend over an arbitrary remote tier.
    pub async fn new(
        remote: Arc<dyn RemoteStore>,
        fallback: FallbackConfig,
        upload_timeout: Duration,
    ) -> InftResult<Self> {
        let local = Arc::new(LocalStore::new(&fallback.local_storage_dir));
        if fallback.enable_fallback {
            local.ensure_root().await?;
        }

        Ok(Self {
            remote,
            local: RwLock::new(local),
            fallback: RwLock::new(fallback),
            upload_timeout,
        })
    }

    /// Copy of the active fallback policy.
    pub fn fallback_config(&self) -> FallbackConfig {
        self.fallback
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Merge `patch` into the active fallback policy. A new local directory
    /// takes effect for subsequent operations.
    pub fn set_fallback_config(&self, patch: FallbackPatch) {
        let mut fallback = self
            .fallback
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous_dir = fallback.local_storage_dir.clone();
        fallback.merge(patch);

        if fallback.local_storage_dir != previous_dir {
            let mut local = self
                .local
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *local = Arc::new(LocalStore::new(&fallback.local_storage_dir));
        }
        info!("Updated fallback configuration: {:?}", *fallback);
    }

    /// Handle to the local tier.
    pub fn local(&self) -> Arc<LocalStore> {
        self.local
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persist `data` and return its content address.
    pub async fn store(&self, data: &[u8]) -> InftResult<StorageResult> {
        let fallback = self.fallback_config();

        if fallback.prefer_local {
            info!("Using local storage (preferLocal enabled)");
            return self.store_local(data, Provenance::default()).await;
        }

        let root = content_address(data);
        let attempts = fallback.retry_attempts;
        let mut failures: Vec<String> = Vec::new();

        for attempt in 1..=attempts {
            info!("Attempting remote upload (attempt {}/{})", attempt, attempts);

            let failure = match tokio::time::timeout(
                self.upload_timeout,
                self.remote.upload(data, &root),
            )
            .await
            {
                Ok(Ok(tx_hash)) => {
                    info!("Stored {} on remote tier: {}", root.short(), tx_hash);
                    return Ok(StorageResult {
                        transaction_reference: TransactionReference::Chain(tx_hash),
                        content_address: root,
                        size_bytes: data.len() as u64,
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "upload timed out after {}ms",
                    self.upload_timeout.as_millis()
                ),
            };

            warn!("Remote upload attempt {} failed: {}", attempt, failure);
            failures.push(failure);

            if attempt < attempts {
                info!("Retrying in {}ms...", fallback.retry_delay_ms);
                tokio::time::sleep(fallback.retry_delay()).await;
            }
        }

        let last_error = failures.last().cloned();

        if !fallback.enable_fallback {
            return Err(InftError::Transport(format!(
                "remote storage failed after {} attempt(s): {}",
                attempts,
                failures.join("; ")
            )));
        }

        warn!("Remote storage failed, falling back to local storage");
        self.store_local(data, Provenance::fallback(FALLBACK_REASON, last_error.clone()))
            .await
            .map_err(|local_error| {
                InftError::Transport(format!(
                    "both remote storage and local fallback failed. Remote: {}, Local: {}",
                    last_error.unwrap_or_else(|| "no attempts made".to_string()),
                    local_error
                ))
            })
    }

    /// Fetch the object stored under `address`.
    pub async fn retrieve(&self, address: &ContentAddress) -> InftResult<Vec<u8>> {
        let fallback = self.fallback_config();
        let local = self.local();

        let mut local_error = None;
        if local.exists(address).await {
            match local.get(address).await {
                Ok(data) => {
                    info!("Retrieved {} from local storage", address.short());
                    return Ok(data);
                }
                Err(e) => {
                    warn!("Local read of {} failed, trying remote: {}", address.short(), e);
                    local_error = Some(e);
                }
            }
        }

        match self.remote.download(address).await {
            Ok(data) => {
                if fallback.enable_fallback {
                    self.cache_locally(&local, address, &data).await;
                }
                Ok(data)
            }
            Err(remote_error) => match local_error {
                Some(local_error) => Err(local_error),
                None => Err(InftError::NotFound(format!(
                    "{} not found in remote or local storage. Remote: {}, Local: not present",
                    address.short(),
                    remote_error
                ))),
            },
        }
    }

    /// Purge local objects older than `max_age_days`.
    pub async fn cleanup_local(&self, max_age_days: u32) -> InftResult<CleanupReport> {
        if !self.fallback_config().enable_fallback {
            return Ok(CleanupReport::default());
        }
        self.local().cleanup(max_age_days).await
    }

    async fn store_local(&self, data: &[u8], provenance: Provenance) -> InftResult<StorageResult> {
        let put = self.local().put(data, provenance).await?;
        if put.already_present {
            info!("File already exists locally: {}", put.address.short());
        }
        Ok(StorageResult {
            transaction_reference: TransactionReference::Local(put.address),
            content_address: put.address,
            size_bytes: put.size,
        })
    }

    async fn cache_locally(&self, local: &LocalStore, address: &ContentAddress, data: &[u8]) {
        if content_address(data) != *address {
            warn!(
                "Remote bytes for {} hash to a different address, not caching",
                address.short()
            );
            return;
        }
        match local
            .put(data, Provenance::cached_from_remote(*address))
            .await
        {
            Ok(_) => info!("Cached {} locally", address.short()),
            Err(e) => warn!("Failed to cache {} locally: {}", address.short(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_reference_is_tagged() {
        let address = content_address(b"x");
        let reference = TransactionReference::Local(address);
        assert!(reference.is_local());
        assert_eq!(reference.to_string(), format!("local-{}", address.to_hex()));

        let chain = TransactionReference::Chain("0xabc".into());
        assert!(!chain.is_local());
        assert_eq!(chain.to_string(), "0xabc");
    }
}
