//! Agent NFT contract surface.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{parse_abi, Detokenize, Tokenize};
use ethers::contract::{parse_log, Contract, EthEvent};
use ethers::prelude::*;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use tracing::{debug, info};

use crate::error::{InftError, InftResult};

/// Human-readable ABI of the entry points and events this crate uses.
pub const AGENT_NFT_ABI: &[&str] = &[
    "function mint(bytes[] proofs, string[] dataDescriptions, address to) payable returns (uint256)",
    "function transfer(address to, uint256 tokenId, bytes[] proofs)",
    "function clone(address to, uint256 tokenId, bytes[] proofs) returns (uint256)",
    "function update(uint256 tokenId, bytes[] proofs)",
    "function authorizeUsage(uint256 tokenId, address user)",
    "function ownerOf(uint256 tokenId) view returns (address)",
    "function dataHashesOf(uint256 tokenId) view returns (bytes32[])",
    "function dataDescriptionsOf(uint256 tokenId) view returns (string[])",
    "function authorizedUsersOf(uint256 tokenId) view returns (address[])",
    "function name() view returns (string)",
    "event Minted(uint256 indexed _tokenId, address indexed _creator, address indexed _owner, bytes32[] _dataHashes, string[] _dataDescriptions)",
    "event Cloned(uint256 indexed _tokenId, uint256 indexed _newTokenId, address _from, address _to)",
];

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "Minted",
    abi = "Minted(uint256,address,address,bytes32[],string[])"
)]
pub struct MintedFilter {
    #[ethevent(indexed)]
    pub token_id: U256,
    #[ethevent(indexed)]
    pub creator: Address,
    #[ethevent(indexed)]
    pub owner: Address,
    pub data_hashes: Vec<[u8; 32]>,
    pub data_descriptions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(name = "Cloned", abi = "Cloned(uint256,uint256,address,address)")]
pub struct ClonedFilter {
    #[ethevent(indexed)]
    pub token_id: U256,
    #[ethevent(indexed)]
    pub new_token_id: U256,
    pub from: Address,
    pub to: Address,
}

/// First log in `receipt` that decodes as `E`. Logs with another signature
/// are skipped without decoding.
pub fn decode_first<E: EthEvent>(receipt: &TransactionReceipt) -> Option<E> {
    let signature = E::signature();
    receipt
        .logs
        .iter()
        .filter(|log| log.topics.first() == Some(&signature))
        .find_map(|log| parse_log::<E>(log.clone()).ok())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Calls consumed from the agent NFT contract. Writes resolve once the
/// transaction is mined; there is no timeout on confirmation.
#[async_trait]
pub trait AgentNftContract: Send + Sync {
    async fn mint(
        &self,
        proofs: Vec<Bytes>,
        descriptions: Vec<String>,
        to: Address,
    ) -> InftResult<TransactionReceipt>;

    async fn transfer(
        &self,
        to: Address,
        token_id: U256,
        proofs: Vec<Bytes>,
    ) -> InftResult<TransactionReceipt>;

    async fn clone_token(
        &self,
        to: Address,
        token_id: U256,
        proofs: Vec<Bytes>,
    ) -> InftResult<TransactionReceipt>;

    async fn update(&self, token_id: U256, proofs: Vec<Bytes>) -> InftResult<TransactionReceipt>;

    async fn authorize_usage(&self, token_id: U256, user: Address)
        -> InftResult<TransactionReceipt>;

    async fn owner_of(&self, token_id: U256) -> InftResult<Address>;

    async fn data_hashes_of(&self, token_id: U256) -> InftResult<Vec<H256>>;

    async fn data_descriptions_of(&self, token_id: U256) -> InftResult<Vec<String>>;

    async fn authorized_users_of(&self, token_id: U256) -> InftResult<Vec<Address>>;

    async fn name(&self) -> InftResult<String>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ETHERS BINDING
// ═══════════════════════════════════════════════════════════════════════════════

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// [`AgentNftContract`] over an HTTP JSON-RPC provider and a local signer.
pub struct EthersAgentNft {
    contract: Contract<SignerClient>,
}

impl EthersAgentNft {
    pub fn new(client: Arc<SignerClient>, address: Address) -> InftResult<Self> {
        let abi = parse_abi(AGENT_NFT_ABI)
            .map_err(|e| InftError::Contract(format!("invalid contract ABI: {e}")))?;
        Ok(Self {
            contract: Contract::new(address, abi, client),
        })
    }

    /// Connect to `rpc_url` and sign with `wallet` on `chain_id`.
    pub fn connect(
        rpc_url: &str,
        wallet: LocalWallet,
        chain_id: u64,
        address: Address,
    ) -> InftResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| InftError::Configuration(format!("invalid RPC URL {rpc_url}: {e}")))?;
        let client = SignerMiddleware::new(provider, wallet.with_chain_id(chain_id));
        Self::new(Arc::new(client), address)
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    async fn send<T: Tokenize>(&self, method: &str, args: T) -> InftResult<TransactionReceipt> {
        let call = self
            .contract
            .method::<_, ()>(method, args)
            .map_err(|e| InftError::Contract(format!("{method}: {e}")))?;

        let pending = call
            .send()
            .await
            .map_err(|e| InftError::Contract(format!("{method}: {e}")))?;
        info!("{} transaction submitted: {:?}", method, pending.tx_hash());

        let receipt = pending
            .await
            .map_err(|e| InftError::Contract(format!("{method}: {e}")))?
            .ok_or_else(|| InftError::Contract(format!("{method}: transaction dropped")))?;

        if receipt.status == Some(U64::zero()) {
            return Err(InftError::Contract(format!(
                "{method}: transaction {:?} reverted",
                receipt.transaction_hash
            )));
        }

        debug!(
            "{} confirmed in block {:?}",
            method, receipt.block_number
        );
        Ok(receipt)
    }

    async fn view<T: Tokenize, R: Detokenize>(&self, method: &str, args: T) -> InftResult<R> {
        self.contract
            .method::<_, R>(method, args)
            .map_err(|e| InftError::Contract(format!("{method}: {e}")))?
            .call()
            .await
            .map_err(|e| InftError::Contract(format!("{method}: {e}")))
    }
}

#[async_trait]
impl AgentNftContract for EthersAgentNft {
    async fn mint(
        &self,
        proofs: Vec<Bytes>,
        descriptions: Vec<String>,
        to: Address,
    ) -> InftResult<TransactionReceipt> {
        self.send("mint", (proofs, descriptions, to)).await
    }

    async fn transfer(
        &self,
        to: Address,
        token_id: U256,
        proofs: Vec<Bytes>,
    ) -> InftResult<TransactionReceipt> {
        self.send("transfer", (to, token_id, proofs)).await
    }

    async fn clone_token(
        &self,
        to: Address,
        token_id: U256,
        proofs: Vec<Bytes>,
    ) -> InftResult<TransactionReceipt> {
        self.send("clone", (to, token_id, proofs)).await
    }

    async fn update(&self, token_id: U256, proofs: Vec<Bytes>) -> InftResult<TransactionReceipt> {
        self.send("update", (token_id, proofs)).await
    }

    async fn authorize_usage(
        &self,
        token_id: U256,
        user: Address,
    ) -> InftResult<TransactionReceipt> {
        self.send("authorizeUsage", (token_id, user)).await
    }

    async fn owner_of(&self, token_id: U256) -> InftResult<Address> {
        self.view("ownerOf", token_id).await
    }

    async fn data_hashes_of(&self, token_id: U256) -> InftResult<Vec<H256>> {
        self.view("dataHashesOf", token_id).await
    }

    async fn data_descriptions_of(&self, token_id: U256) -> InftResult<Vec<String>> {
        self.view("dataDescriptionsOf", token_id).await
    }

    async fn authorized_users_of(&self, token_id: U256) -> InftResult<Vec<Address>> {
        self.view("authorizedUsersOf", token_id).await
    }

    async fn name(&self) -> InftResult<String> {
        self.view("name", ()).await
    }
}
