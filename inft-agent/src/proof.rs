//! Proof formats submitted to the agent NFT contract.
//!
//! Transfer and clone proofs are 144 bytes:
//!
//! ```text
//! ┌──────────────────┬──────────────────┬─────────────────────┬────────────┐
//! │ old data hash 32 │ new data hash 32 │ recipient pubkey 64 │ sealed 16  │
//! └──────────────────┴──────────────────┴─────────────────────┴────────────┘
//! ```
//!
//! Mint and update use a preimage proof instead: the keccak-256 hash of the
//! content address string. The two formats are not interchangeable.

use std::fmt;
use std::str::FromStr;

use ethers::types::{Address, Bytes};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::cipher::{RecipientPublicKey, SealedKey, PUBLIC_KEY_LEN, SEALED_KEY_LEN};
use crate::error::{InftError, InftResult};
use crate::storage::ContentAddress;

/// Length of a transfer proof in bytes.
pub const PROOF_LEN: usize = 32 + 32 + PUBLIC_KEY_LEN + SEALED_KEY_LEN;

const OLD_HASH: std::ops::Range<usize> = 0..32;
const NEW_HASH: std::ops::Range<usize> = 32..64;
const PUBLIC_KEY: std::ops::Range<usize> = 64..128;
const SEALED: std::ops::Range<usize> = 128..PROOF_LEN;

/// Transfer or clone validity proof for one data item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferProof {
    pub old_data_hash: ContentAddress,
    pub new_data_hash: ContentAddress,
    pub recipient: RecipientPublicKey,
    pub sealed_key: SealedKey,
}

impl TransferProof {
    pub fn to_bytes(&self) -> [u8; PROOF_LEN] {
        let mut out = [0u8; PROOF_LEN];
        out[OLD_HASH].copy_from_slice(self.old_data_hash.as_bytes());
        out[NEW_HASH].copy_from_slice(self.new_data_hash.as_bytes());
        out[PUBLIC_KEY].copy_from_slice(self.recipient.as_bytes());
        out[SEALED].copy_from_slice(self.sealed_key.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> InftResult<Self> {
        if bytes.len() != PROOF_LEN {
            return Err(InftError::Validation(format!(
                "proof must be {PROOF_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut old = [0u8; 32];
        let mut new = [0u8; 32];
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        let mut sealed = [0u8; SEALED_KEY_LEN];
        old.copy_from_slice(&bytes[OLD_HASH]);
        new.copy_from_slice(&bytes[NEW_HASH]);
        public_key.copy_from_slice(&bytes[PUBLIC_KEY]);
        sealed.copy_from_slice(&bytes[SEALED]);

        Ok(Self {
            old_data_hash: ContentAddress::from_bytes(old),
            new_data_hash: ContentAddress::from_bytes(new),
            recipient: RecipientPublicKey::from_bytes(public_key),
            sealed_key: SealedKey::from_bytes(sealed),
        })
    }

    /// `0x` followed by 288 hex digits.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Contract calldata form.
    pub fn to_calldata(&self) -> Bytes {
        Bytes::from(self.to_bytes().to_vec())
    }
}

impl fmt::Display for TransferProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TransferProof {
    type Err = InftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        Self::from_bytes(&bytes)
    }
}

/// Assemble the proof binding `old_data_hash` to its re-encrypted successor.
pub fn build_proof(
    old_data_hash: ContentAddress,
    new_data_hash: ContentAddress,
    recipient: RecipientPublicKey,
    sealed_key: SealedKey,
) -> TransferProof {
    TransferProof {
        old_data_hash,
        new_data_hash,
        recipient,
        sealed_key,
    }
}

/// True iff `proof` is hex that decodes to exactly [`PROOF_LEN`] bytes.
pub fn validate_proof(proof: &str) -> bool {
    decode_hex(proof).is_ok_and(|bytes| bytes.len() == PROOF_LEN)
}

/// Split a hex proof back into its fields.
pub fn parse_proof(proof: &str) -> InftResult<TransferProof> {
    proof.parse()
}

/// Mint and update proof: keccak-256 of the `0x`-prefixed address string.
pub fn preimage_proof(address: &ContentAddress) -> [u8; 32] {
    Keccak256::digest(address.to_string().as_bytes()).into()
}

/// Stand-in public key for an account whose real key is unknown:
/// `sha256(lowercase 0x address)` repeated twice.
///
/// Nothing can unseal a key sealed for this value.
pub fn placeholder_public_key(account: Address) -> RecipientPublicKey {
    let text = format!("0x{}", hex::encode(account.as_bytes()));
    let digest = Sha256::digest(text.as_bytes());

    let mut raw = [0u8; PUBLIC_KEY_LEN];
    raw[..32].copy_from_slice(&digest);
    raw[32..].copy_from_slice(&digest);
    RecipientPublicKey::from_bytes(raw)
}

fn decode_hex(s: &str) -> InftResult<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| InftError::Validation(format!("proof is not hex: {e}")))
}
