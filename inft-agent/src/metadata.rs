//! Encrypted agent metadata lifecycle.
//!
//! Every write produces a fresh key, a fresh blob and therefore a fresh
//! content address. Nothing is mutated in place.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cipher::{CipherService, DataKey, RecipientPublicKey, SealedKey};
use crate::error::{InftError, InftResult};
use crate::storage::{ContentAddress, StorageBackend, TransactionReference};

/// Version assigned to a fresh clone.
pub const CLONE_VERSION: &str = "1.0";

/// Result of a version bump that cannot parse its input.
pub const FALLBACK_VERSION: &str = "1.1";

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Plaintext agent record, serialized as camelCase JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_map", skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient_map", skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Fields this crate does not model, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(CLONE_VERSION.to_string()),
            created_at: Some(Utc::now().timestamp_millis()),
            ..Default::default()
        }
    }
}

/// Partial [`AgentMetadata`] used by update and clone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataPatch {
    /// Shallow merge: every field present in the patch replaces the one in
    /// `record`. Fields the patch does not name are left untouched, whatever
    /// their type.
    pub fn merge_into(&self, record: &mut Map<String, Value>) -> InftResult<()> {
        if let Value::Object(fields) = serde_json::to_value(self)? {
            record.extend(fields);
        }
        Ok(())
    }
}

/// An encrypted, stored and sealed metadata record.
#[derive(Clone, Debug)]
pub struct EncryptedMetadata {
    pub content_address: ContentAddress,
    pub sealed_key: SealedKey,
    /// Key of the new blob, returned for immediate chaining. Not persisted.
    pub key: DataKey,
    pub transaction_reference: TransactionReference,
}

/// Decrypted record and the outcome of its structural check.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedMetadata {
    pub metadata: AgentMetadata,
    pub is_valid: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MetadataManager {
    cipher: CipherService,
    storage: Arc<StorageBackend>,
}

impl MetadataManager {
    pub fn new(cipher: CipherService, storage: Arc<StorageBackend>) -> Self {
        Self { cipher, storage }
    }

    pub fn storage(&self) -> &Arc<StorageBackend> {
        &self.storage
    }

    /// Encrypt `metadata` under a fresh key, store it, and seal the key for
    /// `recipient`.
    pub async fn create_agent(
        &self,
        metadata: &AgentMetadata,
        recipient: &RecipientPublicKey,
    ) -> InftResult<EncryptedMetadata> {
        let plaintext = serde_json::to_vec(metadata)?;
        let result = self.seal_and_store(&plaintext, recipient).await?;
        info!("Created agent metadata {}", result.content_address.short());
        Ok(result)
    }

    /// Fetch, decrypt and check the record at `address`. Invalid records are
    /// returned with `is_valid == false`.
    pub async fn retrieve_agent(
        &self,
        address: &ContentAddress,
        key: &DataKey,
    ) -> InftResult<RetrievedMetadata> {
        let record = self.retrieve_record(address, key).await?;
        let value = Value::Object(record);
        let is_valid = is_structurally_valid(&value);
        let metadata: AgentMetadata = serde_json::from_value(value)?;

        debug!(
            "Retrieved agent metadata {} (valid: {})",
            address.short(),
            is_valid
        );
        Ok(RetrievedMetadata { metadata, is_valid })
    }

    /// Merge `patch` over the current record, bump its minor version and
    /// store it re-sealed for the same `recipient`.
    pub async fn update_agent(
        &self,
        address: &ContentAddress,
        key: &DataKey,
        patch: &MetadataPatch,
        recipient: &RecipientPublicKey,
    ) -> InftResult<EncryptedMetadata> {
        let mut record = self.retrieve_record(address, key).await?;
        let version = increment_version(record.get("version").and_then(Value::as_str));

        patch.merge_into(&mut record)?;
        record.insert("version".into(), Value::String(version.clone()));
        record.insert(
            "updatedAt".into(),
            Value::from(Utc::now().timestamp_millis()),
        );

        let plaintext = serde_json::to_vec(&record)?;
        let result = self.seal_and_store(&plaintext, recipient).await?;
        info!(
            "Updated agent metadata {} -> {} (version {})",
            address.short(),
            result.content_address.short(),
            version
        );
        Ok(result)
    }

    /// Re-encrypt the unchanged plaintext under a fresh key sealed for
    /// `new_owner`.
    pub async fn reencrypt_for_transfer(
        &self,
        address: &ContentAddress,
        key: &DataKey,
        new_owner: &RecipientPublicKey,
    ) -> InftResult<EncryptedMetadata> {
        let plaintext = self.decrypt_blob(address, key).await?;
        parse_record(&plaintext)?;

        let result = self.seal_and_store(&plaintext, new_owner).await?;
        info!(
            "Re-encrypted agent metadata {} -> {}",
            address.short(),
            result.content_address.short()
        );
        Ok(result)
    }

    /// Start a new lineage from the record at `address`.
    pub async fn clone_agent(
        &self,
        address: &ContentAddress,
        key: &DataKey,
        new_owner: &RecipientPublicKey,
        modifications: Option<&MetadataPatch>,
    ) -> InftResult<EncryptedMetadata> {
        let mut record = self.retrieve_record(address, key).await?;
        let source_created_at = record.get("createdAt").and_then(millis);

        if let Some(patch) = modifications {
            patch.merge_into(&mut record)?;
        }
        record.insert("version".into(), Value::String(CLONE_VERSION.to_string()));
        record.insert(
            "createdAt".into(),
            Value::from(clone_timestamp(source_created_at)),
        );

        let plaintext = serde_json::to_vec(&record)?;
        let result = self.seal_and_store(&plaintext, new_owner).await?;
        info!(
            "Cloned agent metadata {} -> {}",
            address.short(),
            result.content_address.short()
        );
        Ok(result)
    }

    async fn decrypt_blob(&self, address: &ContentAddress, key: &DataKey) -> InftResult<Vec<u8>> {
        let blob = self.storage.retrieve(address).await?;
        self.cipher.decrypt(&blob, key)
    }

    /// Decrypted record as raw JSON, with every field kept as written.
    async fn retrieve_record(
        &self,
        address: &ContentAddress,
        key: &DataKey,
    ) -> InftResult<Map<String, Value>> {
        let plaintext = self.decrypt_blob(address, key).await?;
        parse_record(&plaintext)
    }

    async fn seal_and_store(
        &self,
        plaintext: &[u8],
        recipient: &RecipientPublicKey,
    ) -> InftResult<EncryptedMetadata> {
        let key = self.cipher.generate_key();
        let blob = self.cipher.encrypt(plaintext, &key)?;

        let stored = self.storage.store(&blob).await?;
        let sealed_key = self.cipher.seal_key(&key, recipient);

        Ok(EncryptedMetadata {
            content_address: stored.content_address,
            sealed_key,
            key,
            transaction_reference: stored.transaction_reference,
        })
    }
}

fn parse_record(plaintext: &[u8]) -> InftResult<Map<String, Value>> {
    match serde_json::from_slice::<Value>(plaintext)? {
        Value::Object(record) => Ok(record),
        _ => Err(InftError::Serialization(
            "decrypted metadata is not a JSON object".into(),
        )),
    }
}

/// Bump the minor component of a `major.minor` version string.
///
/// Each component is read from its leading digits. A missing major reads as
/// 1 and a missing minor as 0, so `"1.9"` becomes `"1.10"` and `"bad"`
/// becomes `"1.1"`.
pub fn increment_version(current: Option<&str>) -> String {
    let Some(current) = current else {
        return FALLBACK_VERSION.to_string();
    };

    let mut parts = current.split('.');
    let major = parts.next().and_then(leading_number).unwrap_or(1);
    let minor = parts.next().and_then(leading_number).unwrap_or(0);
    format!("{}.{}", major, minor.saturating_add(1))
}

fn leading_number(part: &str) -> Option<u64> {
    let trimmed = part.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Creation time of a clone: now, and strictly after its source.
fn clone_timestamp(source_created_at: Option<i64>) -> i64 {
    let now = Utc::now().timestamp_millis();
    match source_created_at {
        Some(source) if source >= now => source.saturating_add(1),
        _ => now,
    }
}

fn millis(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// Structural check: non-empty name, a version, a non-zero creation time.
fn is_structurally_valid(value: &Value) -> bool {
    let non_empty = |field: &str| {
        value
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    let created_at_ok = value
        .get("createdAt")
        .and_then(Value::as_f64)
        .is_some_and(|t| t != 0.0);

    non_empty("name") && non_empty("version") && created_at_ok
}

// ═══════════════════════════════════════════════════════════════════════════════
// LENIENT DESERIALIZERS
// ═══════════════════════════════════════════════════════════════════════════════

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Map<String, Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(millis(&value))
}
