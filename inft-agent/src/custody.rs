//! Key custody: where the data key of a token's metadata item comes from.
//!
//! Transfer, clone and update only ask a [`KeyCustody`] for keys, so the
//! key management backend can change without touching that logic.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::U256;
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::cipher::{CipherService, DataKey, SealedKey};
use crate::error::{InftError, InftResult};

/// Which key of a token is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeySlot {
    /// The key for whole-token operations such as update.
    Token,
    /// The key of the data item at this index.
    Item(usize),
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySlot::Token => f.write_str("token"),
            KeySlot::Item(index) => write!(f, "item {index}"),
        }
    }
}

/// Source of data keys for a token's metadata.
#[async_trait]
pub trait KeyCustody: Send + Sync {
    async fn data_key(&self, token_id: U256, slot: KeySlot) -> InftResult<DataKey>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// DERIVED CUSTODY
// ═══════════════════════════════════════════════════════════════════════════════

/// Deterministic keys derived from the operator's key material.
///
/// Item keys are `sha256("{material}-{tokenId}-{index}")`; the token key is
/// `keccak256("{material}-{tokenId}")`. This is a placeholder keystore: it
/// only yields the key a blob was encrypted with if that blob was created
/// with the same derivation.
pub struct DerivedKeyCustody {
    key_material: String,
}

impl DerivedKeyCustody {
    pub fn new(key_material: impl Into<String>) -> Self {
        Self {
            key_material: key_material.into(),
        }
    }

    /// Use the wallet's private key, as `0x`-prefixed lowercase hex.
    pub fn from_wallet(wallet: &LocalWallet) -> Self {
        Self::new(format!("0x{}", hex::encode(wallet.signer().to_bytes())))
    }

    pub fn derive(&self, token_id: U256, slot: KeySlot) -> DataKey {
        let bytes: [u8; 32] = match slot {
            KeySlot::Item(index) => {
                Sha256::digest(format!("{}-{}-{}", self.key_material, token_id, index)).into()
            }
            KeySlot::Token => {
                Keccak256::digest(format!("{}-{}", self.key_material, token_id)).into()
            }
        };
        DataKey::from_bytes(bytes)
    }
}

impl fmt::Debug for DerivedKeyCustody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeyCustody(..)")
    }
}

#[async_trait]
impl KeyCustody for DerivedKeyCustody {
    async fn data_key(&self, token_id: U256, slot: KeySlot) -> InftResult<DataKey> {
        Ok(self.derive(token_id, slot))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEY RING
// ═══════════════════════════════════════════════════════════════════════════════

/// Keys registered explicitly by the caller.
#[derive(Default)]
pub struct KeyRing {
    keys: RwLock<HashMap<(U256, KeySlot), DataKey>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token_id: U256, slot: KeySlot, key: DataKey) {
        self.keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((token_id, slot), key);
    }

    pub fn len(&self) -> usize {
        self.keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyCustody for KeyRing {
    async fn data_key(&self, token_id: U256, slot: KeySlot) -> InftResult<DataKey> {
        self.keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(token_id, slot))
            .cloned()
            .ok_or_else(|| {
                InftError::NotFound(format!("no data key for token {token_id} {slot}"))
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEALED CUSTODY
// ═══════════════════════════════════════════════════════════════════════════════

/// Keys recovered by unsealing with the operator identity.
///
/// With the half-key sealing scheme only `key[0..16]` comes back, so blobs
/// encrypted with a full random key will fail to decrypt with an integrity
/// error. A full key-wrapping scheme slots in behind the same interface.
pub struct SealedKeyCustody {
    cipher: CipherService,
    identity: LocalWallet,
    sealed: RwLock<HashMap<(U256, KeySlot), SealedKey>>,
}

impl SealedKeyCustody {
    pub fn new(cipher: CipherService, identity: LocalWallet) -> Self {
        Self {
            cipher,
            identity,
            sealed: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, token_id: U256, slot: KeySlot, sealed: SealedKey) {
        self.sealed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((token_id, slot), sealed);
    }
}

#[async_trait]
impl KeyCustody for SealedKeyCustody {
    async fn data_key(&self, token_id: U256, slot: KeySlot) -> InftResult<DataKey> {
        let sealed = self
            .sealed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(token_id, slot))
            .copied()
            .ok_or_else(|| {
                InftError::NotFound(format!("no sealed key for token {token_id} {slot}"))
            })?;
        Ok(self.cipher.unseal_key(&sealed, &self.identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::RecipientPublicKey;

    const PRIVATE_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_item_key_derivation() {
        let custody = DerivedKeyCustody::new("0xabc");
        let key = custody.derive(U256::from(7), KeySlot::Item(2));
        let expected: [u8; 32] = Sha256::digest(b"0xabc-7-2").into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_token_key_derivation() {
        let custody = DerivedKeyCustody::new("0xabc");
        let key = custody.derive(U256::from(7), KeySlot::Token);
        let expected: [u8; 32] = Keccak256::digest(b"0xabc-7").into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_wallet_material_is_prefixed_hex() {
        let wallet: LocalWallet = PRIVATE_KEY.parse().unwrap();
        let from_wallet = DerivedKeyCustody::from_wallet(&wallet);
        let explicit = DerivedKeyCustody::new(format!("0x{PRIVATE_KEY}"));
        assert_eq!(
            from_wallet.derive(U256::one(), KeySlot::Item(0)),
            explicit.derive(U256::one(), KeySlot::Item(0))
        );
    }

    #[tokio::test]
    async fn test_key_ring_lookup() {
        let ring = KeyRing::new();
        let key = CipherService::new().generate_key();
        ring.insert(U256::from(3), KeySlot::Item(0), key.clone());

        assert_eq!(ring.data_key(U256::from(3), KeySlot::Item(0)).await.unwrap(), key);
        assert!(matches!(
            ring.data_key(U256::from(3), KeySlot::Item(1)).await,
            Err(InftError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sealed_custody_unseals_first_half() {
        let cipher = CipherService::new();
        let identity: LocalWallet = PRIVATE_KEY.parse().unwrap();
        let key = cipher.generate_key();
        let sealed = cipher.seal_key(&key, &RecipientPublicKey::of_wallet(&identity));

        let custody = SealedKeyCustody::new(cipher, identity);
        custody.insert(U256::from(9), KeySlot::Token, sealed);

        let recovered = custody.data_key(U256::from(9), KeySlot::Token).await.unwrap();
        assert_eq!(recovered.as_bytes()[..16], key.as_bytes()[..16]);
    }
}
