//! Symmetric encryption of metadata blobs and recipient key sealing.
//!
//! Blob layout: `nonce (16) ‖ ciphertext ‖ tag (16)`, AES-256-GCM.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::signers::LocalWallet;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{InftError, InftResult};

/// AES-256-GCM with a 128-bit nonce.
type BlobCipher = AesGcm<Aes256, U16>;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const SEALED_KEY_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// KEY TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// 256-bit symmetric key protecting one metadata blob.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey([u8; KEY_LEN]);

impl DataKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> InftResult<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            InftError::Crypto(format!(
                "key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// A data key bound to one recipient public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SealedKey([u8; SEALED_KEY_LEN]);

impl SealedKey {
    pub const fn from_bytes(bytes: [u8; SEALED_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEALED_KEY_LEN] {
        &self.0
    }
}

impl fmt::Display for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedKey({self})")
    }
}

impl FromStr for SealedKey {
    type Err = InftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed(s, "sealed key").map(Self)
    }
}

/// Uncompressed secp256k1 public key without the `0x04` prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientPublicKey([u8; PUBLIC_KEY_LEN]);

impl RecipientPublicKey {
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Accepts the 64-byte raw form or the 65-byte SEC1 form with `0x04` prefix.
    pub fn from_slice(bytes: &[u8]) -> InftResult<Self> {
        let raw = match bytes.len() {
            65 if bytes[0] == 0x04 => &bytes[1..],
            _ => bytes,
        };
        let raw: [u8; PUBLIC_KEY_LEN] = raw.try_into().map_err(|_| {
            InftError::Validation(format!(
                "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    /// Public key belonging to a local signing identity.
    pub fn of_wallet(wallet: &LocalWallet) -> Self {
        let point = wallet.signer().verifying_key().to_encoded_point(false);
        let mut raw = [0u8; PUBLIC_KEY_LEN];
        raw.copy_from_slice(&point.as_bytes()[1..]);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// 65-byte SEC1 uncompressed encoding, `0x04 ‖ x ‖ y`.
    pub fn to_sec1(&self) -> [u8; PUBLIC_KEY_LEN + 1] {
        let mut sec1 = [0u8; PUBLIC_KEY_LEN + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.0);
        sec1
    }

    /// Sealing mask: `sha256` over the SEC1 encoding.
    fn mask(&self) -> [u8; 32] {
        Sha256::digest(self.to_sec1()).into()
    }
}

impl fmt::Display for RecipientPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RecipientPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientPublicKey({self})")
    }
}

impl FromStr for RecipientPublicKey {
    type Err = InftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| InftError::Validation(format!("public key: {e}")))?;
        Self::from_slice(&bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CIPHER SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless encryption and key sealing operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct CipherService;

impl CipherService {
    pub fn new() -> Self {
        Self
    }

    /// Fresh random 256-bit key.
    pub fn generate_key(&self) -> DataKey {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        DataKey(key)
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8], key: &DataKey) -> InftResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = BlobCipher::new(GenericArray::from_slice(&key.0));
        let sealed = cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| InftError::Crypto("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Verify the tag and decrypt a blob produced by [`CipherService::encrypt`].
    pub fn decrypt(&self, blob: &[u8], key: &DataKey) -> InftResult<Vec<u8>> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(InftError::Integrity(format!(
                "blob of {} bytes is shorter than nonce and tag",
                blob.len()
            )));
        }

        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let cipher = BlobCipher::new(GenericArray::from_slice(&key.0));
        cipher
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .map_err(|_| InftError::Integrity("authentication tag mismatch".into()))
    }

    /// Bind `key` to `recipient`: `key[0..16] XOR sha256(0x04 ‖ recipient)[0..16]`.
    ///
    /// Only the first half of the key is sealed; `key[16..32]` is not carried
    /// and cannot be recovered by [`CipherService::unseal_key`].
    pub fn seal_key(&self, key: &DataKey, recipient: &RecipientPublicKey) -> SealedKey {
        let mask = recipient.mask();
        let mut sealed = [0u8; SEALED_KEY_LEN];
        for (i, byte) in sealed.iter_mut().enumerate() {
            *byte = key.0[i] ^ mask[i];
        }
        SealedKey(sealed)
    }

    /// Recover the sealed half of a key with the recipient's private key.
    /// Bytes `16..32` of the result are zero.
    pub fn unseal_key(&self, sealed: &SealedKey, identity: &LocalWallet) -> DataKey {
        let mask = RecipientPublicKey::of_wallet(identity).mask();
        let mut key = [0u8; KEY_LEN];
        for i in 0..SEALED_KEY_LEN {
            key[i] = sealed.0[i] ^ mask[i];
        }
        DataKey(key)
    }
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> InftResult<[u8; N]> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes =
        hex::decode(digits).map_err(|e| InftError::Validation(format!("{what}: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        InftError::Validation(format!("{what} must be {N} bytes, got {}", b.len()))
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn wallet() -> LocalWallet {
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = CipherService::new();
        let key = cipher.generate_key();
        let blob = cipher.encrypt(b"{\"name\":\"Agent1\"}", &key).unwrap();

        assert_eq!(blob.len(), NONCE_LEN + 17 + TAG_LEN);
        assert_eq!(cipher.decrypt(&blob, &key).unwrap(), b"{\"name\":\"Agent1\"}");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = CipherService::new();
        let key = cipher.generate_key();
        let a = cipher.encrypt(b"same", &key).unwrap();
        let b = cipher.encrypt(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let cipher = CipherService::new();
        let blob = cipher.encrypt(b"secret", &cipher.generate_key()).unwrap();
        let err = cipher.decrypt(&blob, &cipher.generate_key()).unwrap_err();
        assert!(matches!(err, InftError::Integrity(_)));
    }

    #[test]
    fn test_tampered_blob_is_integrity_error() {
        let cipher = CipherService::new();
        let key = cipher.generate_key();
        let mut blob = cipher.encrypt(b"secret", &key).unwrap();
        blob[NONCE_LEN] ^= 0xff;
        assert!(matches!(
            cipher.decrypt(&blob, &key),
            Err(InftError::Integrity(_))
        ));
    }

    #[test]
    fn test_short_blob_is_integrity_error() {
        let cipher = CipherService::new();
        let key = cipher.generate_key();
        assert!(matches!(
            cipher.decrypt(&[0u8; NONCE_LEN + TAG_LEN - 1], &key),
            Err(InftError::Integrity(_))
        ));
    }

    #[test]
    fn test_key_length_checked() {
        assert!(matches!(
            DataKey::from_slice(&[0u8; 16]),
            Err(InftError::Crypto(_))
        ));
        assert!(DataKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_unseal_recovers_first_half_only() {
        let cipher = CipherService::new();
        let identity = wallet();
        let key = cipher.generate_key();

        let sealed = cipher.seal_key(&key, &RecipientPublicKey::of_wallet(&identity));
        let unsealed = cipher.unseal_key(&sealed, &identity);

        assert_eq!(unsealed.as_bytes()[..16], key.as_bytes()[..16]);
        assert_eq!(unsealed.as_bytes()[16..], [0u8; 16]);
    }

    #[test]
    fn test_seal_matches_known_vector() {
        let identity = wallet();
        let public_key = RecipientPublicKey::of_wallet(&identity);
        assert_eq!(
            hex::encode(public_key.to_sec1()),
            "044e3b81af9c2234cad09d679ce6035ed1392347ce64ce405f5dcd36228a25de6e\
             47fd35c4215d1edf53e6f83de344615ce719bdb0fd878f6ed76f06dd277956de"
        );

        let mut bytes = [0u8; KEY_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let sealed = CipherService::new().seal_key(&DataKey::from_bytes(bytes), &public_key);
        assert_eq!(sealed.to_string(), "0xd9fcc8a4ada4ae69444b985b2915f873");
    }

    #[test]
    fn test_seal_depends_on_recipient() {
        let cipher = CipherService::new();
        let key = cipher.generate_key();
        let a = cipher.seal_key(&key, &RecipientPublicKey::from_bytes([1u8; 64]));
        let b = cipher.seal_key(&key, &RecipientPublicKey::from_bytes([2u8; 64]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_public_key_accepts_sec1_prefix() {
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&[9u8; 64]);
        let key = RecipientPublicKey::from_slice(&sec1).unwrap();
        assert_eq!(key.as_bytes(), &[9u8; 64]);
        assert!(RecipientPublicKey::from_slice(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_sealed_key_hex_round_trip() {
        let sealed = SealedKey::from_bytes([0xab; 16]);
        assert_eq!(sealed.to_string().parse::<SealedKey>().unwrap(), sealed);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
            key in any::<[u8; KEY_LEN]>(),
        ) {
            let cipher = CipherService::new();
            let key = DataKey::from_bytes(key);
            let blob = cipher.encrypt(&plaintext, &key).unwrap();
            prop_assert_eq!(blob.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
            prop_assert_eq!(cipher.decrypt(&blob, &key).unwrap(), plaintext);
        }

        #[test]
        fn prop_wrong_key_fails(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            key in any::<[u8; KEY_LEN]>(),
            other in any::<[u8; KEY_LEN]>(),
        ) {
            prop_assume!(key != other);
            let cipher = CipherService::new();
            let blob = cipher.encrypt(&plaintext, &DataKey::from_bytes(key)).unwrap();
            let result = cipher.decrypt(&blob, &DataKey::from_bytes(other));
            prop_assert!(matches!(result, Err(InftError::Integrity(_))));
        }
    }
}
