//! Error types for the intelligent-NFT agent stack.

use thiserror::Error;

use crate::storage::ContentAddress;

/// Result alias used across the crate.
pub type InftResult<T> = std::result::Result<T, InftError>;

/// Errors that can occur while managing agent metadata, storage and proofs.
#[derive(Debug, Error)]
pub enum InftError {
    // ═══════════════════════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Malformed address, hash, key or proof length.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Object absent from every storage tier that was consulted.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or timeout talking to the remote tier.
    #[error("transport error: {0}")]
    Transport(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("crypto error: {0}")]
    Crypto(String),

    /// Authentication tag mismatch or a blob too short to be well formed.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // CHAIN ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("contract call failed: {0}")]
    Contract(String),

    #[error("{0} event not found in transaction receipt")]
    EventNotFound(&'static str),

    // ═══════════════════════════════════════════════════════════════════════════════
    // WRAPPERS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// A failure scoped to a named client operation.
    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<InftError>,
    },

    /// Item `index` of a multi-item transfer or clone failed. `completed` lists
    /// the content addresses already written for earlier items.
    #[error("item {index} failed after {} completed item(s): {source}", .completed.len())]
    BatchItem {
        index: usize,
        completed: Vec<ContentAddress>,
        #[source]
        source: Box<InftError>,
    },

    // ═══════════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InftError {
    /// Wrap `self` with the name of the client operation that produced it.
    pub fn during(self, operation: &'static str) -> Self {
        InftError::Operation {
            operation,
            source: Box::new(self),
        }
    }

    /// The underlying taxonomy error, skipping operation and batch wrappers.
    pub fn root(&self) -> &InftError {
        match self {
            InftError::Operation { source, .. } | InftError::BatchItem { source, .. } => {
                source.root()
            }
            other => other,
        }
    }
}

impl From<serde_json::Error> for InftError {
    fn from(err: serde_json::Error) -> Self {
        InftError::Serialization(err.to_string())
    }
}
