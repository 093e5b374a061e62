//! End-to-end token operations against the agent NFT contract.
//!
//! Every public operation wraps its failure with the operation name, so a
//! caller sees `"mint failed: ..."` and can still match on
//! [`InftError::root`].

use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::cipher::{RecipientPublicKey, SealedKey};
use crate::contract::{decode_first, AgentNftContract, ClonedFilter, MintedFilter};
use crate::custody::KeySlot;
use crate::error::{InftError, InftResult};
use crate::metadata::{AgentMetadata, EncryptedMetadata, MetadataManager, MetadataPatch};
use crate::proof::preimage_proof;
use crate::storage::ContentAddress;
use crate::transfer::{TransferCoordinator, TransferPlan};

const DEFAULT_AGENT_NAME: &str = "Dolly Vibe Agent";
const DEFAULT_AGENT_DESCRIPTION: &str = "Intelligent NFT based on user profile";

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct MintOutcome {
    pub token_id: U256,
    pub tx_hash: H256,
    pub content_address: ContentAddress,
    pub sealed_key: SealedKey,
}

#[derive(Clone, Debug)]
pub struct CloneOutcome {
    pub new_token_id: U256,
    pub tx_hash: H256,
    pub plan: TransferPlan,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub token_id: U256,
    pub owner: Address,
    pub data_hashes: Vec<ContentAddress>,
    pub data_descriptions: Vec<String>,
    pub authorized_users: Vec<Address>,
}

/// Contract data description for a freshly minted agent.
pub fn data_description(metadata: &AgentMetadata) -> String {
    let name = if metadata.name.is_empty() {
        DEFAULT_AGENT_NAME
    } else {
        &metadata.name
    };
    let description = metadata
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_AGENT_DESCRIPTION);
    format!("INFT: {name} - {description}")
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AgentRegistryClient {
    contract: Arc<dyn AgentNftContract>,
    identity: LocalWallet,
    metadata: Arc<MetadataManager>,
    transfers: TransferCoordinator,
}

impl AgentRegistryClient {
    pub fn new(
        contract: Arc<dyn AgentNftContract>,
        identity: LocalWallet,
        metadata: Arc<MetadataManager>,
        transfers: TransferCoordinator,
    ) -> Self {
        Self {
            contract,
            identity,
            metadata,
            transfers,
        }
    }

    /// Address of the operator identity.
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// Public key of the operator identity.
    pub fn public_key(&self) -> RecipientPublicKey {
        RecipientPublicKey::of_wallet(&self.identity)
    }

    pub fn metadata(&self) -> &Arc<MetadataManager> {
        &self.metadata
    }

    /// Encrypt and store `metadata`, sealed for the operator.
    pub async fn make_metadata(&self, metadata: &AgentMetadata) -> InftResult<EncryptedMetadata> {
        self.metadata
            .create_agent(metadata, &self.public_key())
            .await
            .map_err(|e| e.during("make metadata"))
    }

    /// Mint a token for `recipient` (the operator by default). When
    /// `precomputed` is given, its stored blob is used as-is.
    pub async fn mint(
        &self,
        metadata: &AgentMetadata,
        recipient: Option<Address>,
        precomputed: Option<EncryptedMetadata>,
    ) -> InftResult<MintOutcome> {
        self.mint_inner(metadata, recipient, precomputed)
            .await
            .map_err(|e| e.during("mint"))
    }

    async fn mint_inner(
        &self,
        metadata: &AgentMetadata,
        recipient: Option<Address>,
        precomputed: Option<EncryptedMetadata>,
    ) -> InftResult<MintOutcome> {
        let to = recipient.unwrap_or_else(|| self.address());

        let encrypted = match precomputed {
            Some(encrypted) => {
                info!("Using provided encrypted metadata");
                encrypted
            }
            None => {
                self.metadata
                    .create_agent(metadata, &self.public_key())
                    .await?
            }
        };

        let proof = Bytes::from(preimage_proof(&encrypted.content_address).to_vec());
        let receipt = self
            .contract
            .mint(vec![proof], vec![data_description(metadata)], to)
            .await?;
        let token_id = extract_token_id(&receipt)?;

        info!("Minted token {} for {:?}", token_id, to);
        Ok(MintOutcome {
            token_id,
            tx_hash: receipt.transaction_hash,
            content_address: encrypted.content_address,
            sealed_key: encrypted.sealed_key,
        })
    }

    /// Re-encrypt every data item for `to` and transfer the token.
    pub async fn transfer(&self, token_id: U256, to: Address) -> InftResult<H256> {
        self.transfer_inner(token_id, to)
            .await
            .map_err(|e| e.during("transfer"))
    }

    async fn transfer_inner(&self, token_id: U256, to: Address) -> InftResult<H256> {
        info!("Transferring token {} to {:?}", token_id, to);
        let data_hashes = self.current_data(token_id).await?;

        let plan = self
            .transfers
            .prepare_transfer(token_id, to, &data_hashes, &data_hashes)
            .await?;

        let receipt = self
            .contract
            .transfer(to, token_id, proofs_calldata(&plan))
            .await?;

        info!("Transfer completed: {:?}", receipt.transaction_hash);
        Ok(receipt.transaction_hash)
    }

    /// Clone every data item for `to` and mint the clone as a new token.
    pub async fn clone(
        &self,
        token_id: U256,
        to: Address,
        modifications: Option<&MetadataPatch>,
    ) -> InftResult<CloneOutcome> {
        self.clone_inner(token_id, to, modifications)
            .await
            .map_err(|e| e.during("clone"))
    }

    async fn clone_inner(
        &self,
        token_id: U256,
        to: Address,
        modifications: Option<&MetadataPatch>,
    ) -> InftResult<CloneOutcome> {
        info!("Cloning token {} for {:?}", token_id, to);
        let data_hashes = self.current_data(token_id).await?;

        let plan = self
            .transfers
            .prepare_clone(token_id, to, &data_hashes, &data_hashes, modifications)
            .await?;

        let receipt = self
            .contract
            .clone_token(to, token_id, proofs_calldata(&plan))
            .await?;
        let cloned = decode_first::<ClonedFilter>(&receipt)
            .ok_or(InftError::EventNotFound("Cloned"))?;

        info!("Clone completed, new token {}", cloned.new_token_id);
        Ok(CloneOutcome {
            new_token_id: cloned.new_token_id,
            tx_hash: receipt.transaction_hash,
            plan,
        })
    }

    /// Merge `patch` into the token's metadata and record the new version.
    pub async fn update(&self, token_id: U256, patch: &MetadataPatch) -> InftResult<H256> {
        self.update_inner(token_id, patch)
            .await
            .map_err(|e| e.during("update"))
    }

    async fn update_inner(&self, token_id: U256, patch: &MetadataPatch) -> InftResult<H256> {
        info!("Updating token {}", token_id);
        let data_hashes = self.current_data(token_id).await?;
        let key = self
            .transfers
            .custody()
            .data_key(token_id, KeySlot::Token)
            .await?;

        let updated = self
            .metadata
            .update_agent(&data_hashes[0], &key, patch, &self.public_key())
            .await?;

        let proof = Bytes::from(preimage_proof(&updated.content_address).to_vec());
        let receipt = self.contract.update(token_id, vec![proof]).await?;

        info!("Update completed: {:?}", receipt.transaction_hash);
        Ok(receipt.transaction_hash)
    }

    /// Owner, data hashes, descriptions and authorized users, read concurrently.
    pub async fn token_info(&self, token_id: U256) -> InftResult<TokenInfo> {
        let reads = async {
            futures::try_join!(
                self.contract.owner_of(token_id),
                self.contract.data_hashes_of(token_id),
                self.contract.data_descriptions_of(token_id),
                self.contract.authorized_users_of(token_id),
            )
        };
        let (owner, data_hashes, data_descriptions, authorized_users) =
            reads.await.map_err(|e| e.during("get token info"))?;

        Ok(TokenInfo {
            token_id,
            owner,
            data_hashes: data_hashes
                .into_iter()
                .map(|h| ContentAddress::from_bytes(h.0))
                .collect(),
            data_descriptions,
            authorized_users,
        })
    }

    pub async fn authorize_usage(&self, token_id: U256, user: Address) -> InftResult<H256> {
        let receipt = self
            .contract
            .authorize_usage(token_id, user)
            .await
            .map_err(|e| e.during("authorize usage"))?;
        info!("Authorized {:?} on token {}", user, token_id);
        Ok(receipt.transaction_hash)
    }

    /// Whether the contract answers a read call.
    pub async fn is_ready(&self) -> bool {
        match self.contract.name().await {
            Ok(name) => {
                info!("Contract ready: {}", name);
                true
            }
            Err(e) => {
                warn!("Contract readiness check failed: {}", e);
                false
            }
        }
    }

    /// On-chain data hashes of `token_id`. In this system they are the
    /// content addresses of the token's metadata items.
    async fn current_data(&self, token_id: U256) -> InftResult<Vec<ContentAddress>> {
        let hashes: Vec<ContentAddress> = self
            .contract
            .data_hashes_of(token_id)
            .await?
            .into_iter()
            .map(|h| ContentAddress::from_bytes(h.0))
            .collect();

        if hashes.is_empty() {
            return Err(InftError::Validation(format!(
                "token {token_id} has no data items"
            )));
        }
        Ok(hashes)
    }
}

/// Token id assigned by a mint, from the receipt's `Minted` event.
pub fn extract_token_id(receipt: &TransactionReceipt) -> InftResult<U256> {
    decode_first::<MintedFilter>(receipt)
        .map(|event| event.token_id)
        .ok_or(InftError::EventNotFound("Minted"))
}

fn proofs_calldata(plan: &TransferPlan) -> Vec<Bytes> {
    plan.proofs.iter().map(|p| p.to_calldata()).collect()
}
