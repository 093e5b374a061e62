//! Multi-item transfer and clone preparation.
//!
//! Items are processed one at a time in input order. A failure at item `i`
//! aborts the batch; items before `i` stay stored and are reported in
//! [`InftError::BatchItem`]. Nothing reaches the contract until the whole
//! batch succeeds, so those objects are unreferenced.

use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, U256};
use sha3::{Digest, Keccak256};
use tracing::{debug, info};

use crate::cipher::{RecipientPublicKey, SealedKey};
use crate::custody::{KeyCustody, KeySlot};
use crate::error::{InftError, InftResult};
use crate::metadata::{MetadataManager, MetadataPatch};
use crate::proof::{build_proof, placeholder_public_key, TransferProof};
use crate::storage::ContentAddress;

/// Per-item outputs of a transfer or clone, index-aligned with the inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferPlan {
    pub proofs: Vec<TransferProof>,
    pub new_addresses: Vec<ContentAddress>,
    pub sealed_keys: Vec<SealedKey>,
}

impl TransferPlan {
    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    fn push(&mut self, proof: TransferProof) {
        self.new_addresses.push(proof.new_data_hash);
        self.sealed_keys.push(proof.sealed_key);
        self.proofs.push(proof);
    }
}

#[derive(Clone, Copy)]
enum ItemAction<'a> {
    Reencrypt,
    Clone(Option<&'a MetadataPatch>),
}

pub struct TransferCoordinator {
    metadata: Arc<MetadataManager>,
    custody: Arc<dyn KeyCustody>,
}

impl TransferCoordinator {
    pub fn new(metadata: Arc<MetadataManager>, custody: Arc<dyn KeyCustody>) -> Self {
        Self { metadata, custody }
    }

    pub fn custody(&self) -> &Arc<dyn KeyCustody> {
        &self.custody
    }

    /// Re-encrypt every item of `token_id` for `recipient` and build one
    /// proof per item.
    pub async fn prepare_transfer(
        &self,
        token_id: U256,
        recipient: Address,
        current_addresses: &[ContentAddress],
        current_data_hashes: &[ContentAddress],
    ) -> InftResult<TransferPlan> {
        let plan = self
            .prepare(
                token_id,
                recipient,
                current_addresses,
                current_data_hashes,
                ItemAction::Reencrypt,
            )
            .await?;
        info!(
            "Prepared transfer of token {} to {:?}: {} item(s)",
            token_id,
            recipient,
            plan.len()
        );
        Ok(plan)
    }

    /// Clone every item of `token_id` for `recipient`, applying
    /// `modifications` to each.
    pub async fn prepare_clone(
        &self,
        token_id: U256,
        recipient: Address,
        current_addresses: &[ContentAddress],
        current_data_hashes: &[ContentAddress],
        modifications: Option<&MetadataPatch>,
    ) -> InftResult<TransferPlan> {
        let plan = self
            .prepare(
                token_id,
                recipient,
                current_addresses,
                current_data_hashes,
                ItemAction::Clone(modifications),
            )
            .await?;
        info!(
            "Prepared clone of token {} for {:?}: {} item(s)",
            token_id,
            recipient,
            plan.len()
        );
        Ok(plan)
    }

    async fn prepare(
        &self,
        token_id: U256,
        recipient: Address,
        current_addresses: &[ContentAddress],
        current_data_hashes: &[ContentAddress],
        action: ItemAction<'_>,
    ) -> InftResult<TransferPlan> {
        if current_addresses.len() != current_data_hashes.len() {
            return Err(InftError::Validation(format!(
                "{} content addresses but {} data hashes",
                current_addresses.len(),
                current_data_hashes.len()
            )));
        }

        let recipient_key = placeholder_public_key(recipient);
        let mut plan = TransferPlan::default();

        for (index, (address, data_hash)) in current_addresses
            .iter()
            .zip(current_data_hashes)
            .enumerate()
        {
            let proof = self
                .prepare_item(token_id, index, address, data_hash, &recipient_key, action)
                .await
                .map_err(|source| InftError::BatchItem {
                    index,
                    completed: plan.new_addresses.clone(),
                    source: Box::new(source),
                })?;
            debug!("Item {} of token {} -> {}", index, token_id, proof.new_data_hash.short());
            plan.push(proof);
        }

        Ok(plan)
    }

    async fn prepare_item(
        &self,
        token_id: U256,
        index: usize,
        address: &ContentAddress,
        data_hash: &ContentAddress,
        recipient: &RecipientPublicKey,
        action: ItemAction<'_>,
    ) -> InftResult<TransferProof> {
        let key = self.custody.data_key(token_id, KeySlot::Item(index)).await?;

        let result = match action {
            ItemAction::Reencrypt => {
                self.metadata
                    .reencrypt_for_transfer(address, &key, recipient)
                    .await?
            }
            ItemAction::Clone(modifications) => {
                self.metadata
                    .clone_agent(address, &key, recipient, modifications)
                    .await?
            }
        };

        Ok(build_proof(
            *data_hash,
            result.content_address,
            *recipient,
            result.sealed_key,
        ))
    }
}

/// Digest signed by a recipient to acknowledge a transfer:
/// `keccak256(old_0 ‖ … ‖ old_n ‖ new_0 ‖ … ‖ new_n)`.
pub fn transfer_confirmation_digest(
    old_hashes: &[ContentAddress],
    new_hashes: &[ContentAddress],
) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for hash in old_hashes.iter().chain(new_hashes) {
        hasher.update(hash.as_bytes());
    }
    hasher.finalize().into()
}

/// Recipient's personal-message signature over the confirmation digest.
pub async fn sign_transfer_confirmation(
    old_hashes: &[ContentAddress],
    new_hashes: &[ContentAddress],
    recipient: &LocalWallet,
) -> InftResult<Signature> {
    let digest = transfer_confirmation_digest(old_hashes, new_hashes);
    recipient
        .sign_message(digest)
        .await
        .map_err(|e| InftError::Crypto(format!("transfer confirmation signing failed: {e}")))
}
