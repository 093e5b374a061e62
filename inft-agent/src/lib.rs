//! Intelligent-NFT agent backend.
//!
//! Agent metadata is encrypted per version, kept in a content-addressed store
//! with a local disk fallback, and bound to on-chain tokens through fixed
//! format proofs.
//!
//! ```text
//!   AgentRegistryClient ──► AgentNftContract (chain)
//!        │
//!        ├─► TransferCoordinator ──► KeyCustody
//!        │          │
//!        └──────────┴─► MetadataManager ──► CipherService
//!                              │
//!                              └─► StorageBackend ──► RemoteStore (indexer)
//!                                                 └─► LocalStore  (disk)
//! ```

pub mod cipher;
pub mod config;
pub mod context;
pub mod contract;
pub mod custody;
pub mod error;
pub mod metadata;
pub mod proof;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use cipher::{CipherService, DataKey, RecipientPublicKey, SealedKey};
pub use config::{ChainConfig, FallbackConfig, FallbackPatch, InftConfig, StorageConfig};
pub use context::InftContext;
pub use contract::{AgentNftContract, EthersAgentNft};
pub use custody::{DerivedKeyCustody, KeyCustody, KeyRing, KeySlot, SealedKeyCustody};
pub use error::{InftError, InftResult};
pub use metadata::{
    increment_version, AgentMetadata, EncryptedMetadata, MetadataManager, MetadataPatch,
    RetrievedMetadata,
};
pub use proof::{
    build_proof, parse_proof, placeholder_public_key, preimage_proof, validate_proof,
    TransferProof, PROOF_LEN,
};
pub use registry::{AgentRegistryClient, CloneOutcome, MintOutcome, TokenInfo};
pub use storage::{
    content_address, ContentAddress, StorageBackend, StorageResult, TransactionReference,
};
pub use transfer::{sign_transfer_confirmation, TransferCoordinator, TransferPlan};
