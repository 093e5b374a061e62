//! Content addressing shared by the remote and local tiers.
//!
//! Both tiers key objects by the same identifier: a keccak-256 binary Merkle
//! root over fixed 256-byte chunks of the blob, bound to the blob length.
//!
//! ```text
//!   blob ──► [c0][c1][c2][c3][c4]        (last chunk zero padded)
//!              │   │   │   │   │
//!   leaves    h0  h1  h2  h3  h4          h = keccak256(chunk)
//!               \ /     \ /    │
//!               h01     h23    h4         odd node is promoted
//!                  \   /       │
//!                  h0123       h4
//!                       \     /
//!                        root
//!
//!   address = keccak256(len_be_u64 ‖ root)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::InftError;

/// Size of a Merkle leaf chunk in bytes.
pub const CHUNK_SIZE: usize = 256;

/// 32-byte identifier derived from an object's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress([u8; 32]);

impl ContentAddress {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the `0x` marker, used for on-disk names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Shortened form for log and error messages.
    pub fn short(&self) -> String {
        let full = self.to_hex();
        format!("0x{}...{}", &full[..8], &full[56..])
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", self)
    }
}

impl FromStr for ContentAddress {
    type Err = InftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| InftError::Validation(format!("content address {s:?}: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            InftError::Validation(format!(
                "content address must be 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for ContentAddress {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for ContentAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compute the canonical content address of `data`.
///
/// The tree root is bound to the blob length, so blobs that differ only in
/// trailing zero bytes never share an address.
pub fn content_address(data: &[u8]) -> ContentAddress {
    let mut hasher = Keccak256::new();
    hasher.update((data.len() as u64).to_be_bytes());
    hasher.update(merkle_root(data));
    ContentAddress(hasher.finalize().into())
}

/// Binary Merkle root over zero-padded chunks of `data`.
fn merkle_root(data: &[u8]) -> [u8; 32] {
    if data.is_empty() {
        return keccak(&[]);
    }

    let mut level: Vec<[u8; 32]> = data
        .chunks(CHUNK_SIZE)
        .map(|chunk| {
            let mut padded = [0u8; CHUNK_SIZE];
            padded[..chunk.len()].copy_from_slice(chunk);
            keccak(&padded)
        })
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut nodes = level.iter();
        while let Some(left) = nodes.next() {
            match nodes.next() {
                Some(right) => {
                    let mut hasher = Keccak256::new();
                    hasher.update(left);
                    hasher.update(right);
                    next.push(hasher.finalize().into());
                }
                None => next.push(*left),
            }
        }
        level = next;
    }

    level[0]
}

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}
