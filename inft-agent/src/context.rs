//! Explicit wiring of every service, built once from configuration.

use std::sync::Arc;

use ethers::signers::LocalWallet;
use ethers::types::Address;
use tracing::info;

use crate::cipher::CipherService;
use crate::config::InftConfig;
use crate::contract::EthersAgentNft;
use crate::custody::{DerivedKeyCustody, KeyCustody};
use crate::error::{InftError, InftResult};
use crate::metadata::MetadataManager;
use crate::registry::AgentRegistryClient;
use crate::storage::StorageBackend;
use crate::transfer::TransferCoordinator;

/// Storage and metadata services, usable without chain access.
pub struct InftContext {
    config: InftConfig,
    cipher: CipherService,
    storage: Arc<StorageBackend>,
    metadata: Arc<MetadataManager>,
}

impl InftContext {
    /// Build the storage side from `config`.
    pub async fn open(config: &InftConfig) -> InftResult<Self> {
        let cipher = CipherService::new();
        let storage = Arc::new(StorageBackend::connect(&config.storage).await?);
        let metadata = Arc::new(MetadataManager::new(cipher, storage.clone()));

        Ok(Self {
            config: config.clone(),
            cipher,
            storage,
            metadata,
        })
    }

    /// Build every service, including the contract client.
    pub async fn connect(config: &InftConfig) -> InftResult<AgentRegistryClient> {
        config.chain.validate()?;
        Self::open(config).await?.registry()
    }

    pub fn cipher(&self) -> CipherService {
        self.cipher
    }

    pub fn storage(&self) -> &Arc<StorageBackend> {
        &self.storage
    }

    pub fn metadata(&self) -> &Arc<MetadataManager> {
        &self.metadata
    }

    /// Chain client sharing this context's storage. Keys come from the
    /// operator's derived custody.
    pub fn registry(&self) -> InftResult<AgentRegistryClient> {
        let identity = self.identity()?;
        let custody: Arc<dyn KeyCustody> = Arc::new(DerivedKeyCustody::from_wallet(&identity));
        self.registry_with_custody(custody)
    }

    /// Chain client using an explicit key custody.
    pub fn registry_with_custody(
        &self,
        custody: Arc<dyn KeyCustody>,
    ) -> InftResult<AgentRegistryClient> {
        let chain = &self.config.chain;
        chain.validate()?;

        let identity = self.identity()?;
        let contract_address: Address = chain.contract_address.trim().parse().map_err(|e| {
            InftError::Configuration(format!(
                "invalid contract address {}: {e}",
                chain.contract_address
            ))
        })?;

        let contract = EthersAgentNft::connect(
            &chain.rpc_url,
            identity.clone(),
            chain.chain_id,
            contract_address,
        )?;
        let transfers = TransferCoordinator::new(self.metadata.clone(), custody);

        info!(
            "Connected to agent NFT contract {:?} on chain {}",
            contract_address, chain.chain_id
        );
        Ok(AgentRegistryClient::new(
            Arc::new(contract),
            identity,
            self.metadata.clone(),
            transfers,
        ))
    }

    fn identity(&self) -> InftResult<LocalWallet> {
        let key = self.config.chain.private_key.trim();
        key.strip_prefix("0x")
            .unwrap_or(key)
            .parse()
            .map_err(|e| InftError::Configuration(format!("invalid private key: {e}")))
    }
}
