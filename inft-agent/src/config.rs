//! Runtime configuration.
//!
//! Values are read from the process environment; binaries load `.env` first.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InftError, InftResult};

pub const DEFAULT_CHAIN_ID: u64 = 16601;
pub const DEFAULT_RPC_URL: &str = "https://evmrpc-testnet.0g.ai";
pub const DEFAULT_INDEXER_URL: &str = "https://indexer-storage-testnet-turbo.0g.ai";
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOCAL_STORAGE_DIR: &str = "temp/local-storage";

const CHAIN_ID_ENV: &str = "ZG_CHAIN_ID";
const RPC_URL_ENV: &str = "ZG_RPC_URL";
const INDEXER_URL_ENV: &str = "ZG_INDEXER_URL";
const PRIVATE_KEY_ENV: &str = "ZG_PRIVATE_KEY";
const CONTRACT_ADDRESS_ENV: &str = "AGENT_NFT_CONTRACT_ADDRESS";
const UPLOAD_TIMEOUT_ENV: &str = "ZG_UPLOAD_TIMEOUT_MS";
const FALLBACK_ENABLED_ENV: &str = "INFT_FALLBACK_ENABLED";
const LOCAL_DIR_ENV: &str = "INFT_LOCAL_STORAGE_DIR";
const RETRY_ATTEMPTS_ENV: &str = "INFT_RETRY_ATTEMPTS";
const RETRY_DELAY_ENV: &str = "INFT_RETRY_DELAY_MS";
const PREFER_LOCAL_ENV: &str = "INFT_PREFER_LOCAL";

// ═══════════════════════════════════════════════════════════════════════════════
// FALLBACK
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry and local-fallback policy of the storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackConfig {
    pub enable_fallback: bool,
    pub local_storage_dir: PathBuf,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Skip the remote tier entirely on store.
    pub prefer_local: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            local_storage_dir: PathBuf::from(DEFAULT_LOCAL_STORAGE_DIR),
            retry_attempts: 1,
            retry_delay_ms: 1000,
            prefer_local: false,
        }
    }
}

impl FallbackConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Overlay the fields set in `patch`.
    pub fn merge(&mut self, patch: FallbackPatch) {
        if let Some(v) = patch.enable_fallback {
            self.enable_fallback = v;
        }
        if let Some(v) = patch.local_storage_dir {
            self.local_storage_dir = v;
        }
        if let Some(v) = patch.retry_attempts {
            self.retry_attempts = v;
        }
        if let Some(v) = patch.retry_delay_ms {
            self.retry_delay_ms = v;
        }
        if let Some(v) = patch.prefer_local {
            self.prefer_local = v;
        }
    }
}

/// Partial update of a [`FallbackConfig`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackPatch {
    pub enable_fallback: Option<bool>,
    pub local_storage_dir: Option<PathBuf>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub prefer_local: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE / CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage tier configuration.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub rpc_url: String,
    pub indexer_url: String,
    pub chain_id: u64,
    pub upload_timeout: Duration,
    pub fallback: FallbackConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            indexer_url: DEFAULT_INDEXER_URL.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            upload_timeout: Duration::from_millis(DEFAULT_UPLOAD_TIMEOUT_MS),
            fallback: FallbackConfig::default(),
        }
    }
}

/// Chain access configuration.
#[derive(Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub private_key: String,
    pub contract_address: String,
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("contract_address", &self.contract_address)
            .finish()
    }
}

impl ChainConfig {
    /// Fail if any value needed to reach the contract is missing.
    pub fn validate(&self) -> InftResult<()> {
        if self.private_key.trim().is_empty() {
            return Err(missing(PRIVATE_KEY_ENV));
        }
        if self.contract_address.trim().is_empty() {
            return Err(missing(CONTRACT_ADDRESS_ENV));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(missing(RPC_URL_ENV));
        }
        Ok(())
    }
}

/// Full configuration of the agent stack.
#[derive(Clone, Debug)]
pub struct InftConfig {
    pub chain: ChainConfig,
    pub storage: StorageConfig,
}

impl InftConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> InftResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> InftResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chain_id = parse_or(get(CHAIN_ID_ENV), CHAIN_ID_ENV, DEFAULT_CHAIN_ID)?;
        let rpc_url = get(RPC_URL_ENV).unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let defaults = FallbackConfig::default();
        let fallback = FallbackConfig {
            enable_fallback: parse_bool_or(
                get(FALLBACK_ENABLED_ENV),
                FALLBACK_ENABLED_ENV,
                defaults.enable_fallback,
            )?,
            local_storage_dir: get(LOCAL_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.local_storage_dir),
            retry_attempts: parse_or(
                get(RETRY_ATTEMPTS_ENV),
                RETRY_ATTEMPTS_ENV,
                defaults.retry_attempts,
            )?,
            retry_delay_ms: parse_or(
                get(RETRY_DELAY_ENV),
                RETRY_DELAY_ENV,
                defaults.retry_delay_ms,
            )?,
            prefer_local: parse_bool_or(
                get(PREFER_LOCAL_ENV),
                PREFER_LOCAL_ENV,
                defaults.prefer_local,
            )?,
        };

        let storage = StorageConfig {
            rpc_url: rpc_url.clone(),
            indexer_url: get(INDEXER_URL_ENV).unwrap_or_else(|| DEFAULT_INDEXER_URL.to_string()),
            chain_id,
            upload_timeout: Duration::from_millis(parse_or(
                get(UPLOAD_TIMEOUT_ENV),
                UPLOAD_TIMEOUT_ENV,
                DEFAULT_UPLOAD_TIMEOUT_MS,
            )?),
            fallback,
        };

        let chain = ChainConfig {
            chain_id,
            rpc_url,
            private_key: get(PRIVATE_KEY_ENV).unwrap_or_default(),
            contract_address: get(CONTRACT_ADDRESS_ENV).unwrap_or_default(),
        };

        Ok(Self { chain, storage })
    }
}

fn missing(key: &str) -> InftError {
    InftError::Configuration(format!("{key} is required but not provided"))
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> InftResult<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| InftError::Configuration(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool_or(value: Option<String>, key: &str, default: bool) -> InftResult<bool> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(InftError::Configuration(format!(
            "{key}={v:?} is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = InftConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.chain.chain_id, 16601);
        assert_eq!(config.storage.indexer_url, DEFAULT_INDEXER_URL);
        assert_eq!(config.storage.upload_timeout, Duration::from_secs(10));
        assert_eq!(config.storage.fallback, FallbackConfig::default());
    }

    #[test]
    fn test_validate_reports_missing_secret() {
        let config = InftConfig::from_lookup(lookup(&[(CONTRACT_ADDRESS_ENV, "0x01")])).unwrap();
        let err = config.chain.validate().unwrap_err();
        assert!(matches!(err, InftError::Configuration(ref m) if m.contains(PRIVATE_KEY_ENV)));
    }

    #[test]
    fn test_fallback_overrides() {
        let config = InftConfig::from_lookup(lookup(&[
            (RETRY_ATTEMPTS_ENV, "3"),
            (RETRY_DELAY_ENV, "250"),
            (PREFER_LOCAL_ENV, "true"),
            (FALLBACK_ENABLED_ENV, "no"),
            (LOCAL_DIR_ENV, "/var/lib/inft"),
        ]))
        .unwrap();

        let fallback = config.storage.fallback;
        assert_eq!(fallback.retry_attempts, 3);
        assert_eq!(fallback.retry_delay(), Duration::from_millis(250));
        assert!(fallback.prefer_local);
        assert!(!fallback.enable_fallback);
        assert_eq!(fallback.local_storage_dir, PathBuf::from("/var/lib/inft"));
    }

    #[test]
    fn test_malformed_number_is_configuration_error() {
        let err = InftConfig::from_lookup(lookup(&[(UPLOAD_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert!(matches!(err, InftError::Configuration(_)));
    }

    #[test]
    fn test_merge_patch() {
        let mut config = FallbackConfig::default();
        config.merge(FallbackPatch {
            retry_attempts: Some(5),
            ..Default::default()
        });
        assert_eq!(config.retry_attempts, 5);
        assert!(config.enable_fallback);
    }
}
