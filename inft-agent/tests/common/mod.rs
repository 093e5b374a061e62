//! In-memory doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::contract::EthEvent;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};

use inft_agent::contract::{ClonedFilter, MintedFilter};
use inft_agent::storage::RemoteStore;
use inft_agent::{
    AgentNftContract, ContentAddress, FallbackConfig, InftError, InftResult, StorageBackend,
    TransferProof,
};

pub const OPERATOR_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const RECIPIENT_KEY: &str = "0123456789012345678901234567890123456789012345678901234567890123";

pub fn operator() -> LocalWallet {
    OPERATOR_KEY.parse().unwrap()
}

pub fn recipient() -> LocalWallet {
    RECIPIENT_KEY.parse().unwrap()
}

pub fn fallback_in(dir: &Path) -> FallbackConfig {
    FallbackConfig {
        local_storage_dir: dir.to_path_buf(),
        retry_delay_ms: 10,
        ..Default::default()
    }
}

pub async fn backend(remote: Arc<dyn RemoteStore>, dir: &Path) -> Arc<StorageBackend> {
    Arc::new(
        StorageBackend::new(remote, fallback_in(dir), Duration::from_secs(10))
            .await
            .unwrap(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// REMOTE STORE DOUBLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Remote tier backed by a map.
#[derive(Default)]
pub struct MemoryRemote {
    objects: Mutex<HashMap<ContentAddress, Vec<u8>>>,
    pub uploads: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Place `data` under `root` regardless of its real address.
    pub fn insert(&self, root: ContentAddress, data: &[u8]) {
        self.objects.lock().unwrap().insert(root, data.to_vec());
    }

    pub fn contains(&self, root: &ContentAddress) -> bool {
        self.objects.lock().unwrap().contains_key(root)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upload(&self, data: &[u8], root: &ContentAddress) -> InftResult<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        self.insert(*root, data);
        Ok(format!("0x{:064x}", n + 1))
    }

    async fn download(&self, root: &ContentAddress) -> InftResult<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(root)
            .cloned()
            .ok_or_else(|| InftError::NotFound(format!("{root} not on remote")))
    }
}

/// Remote tier whose uploads never complete and whose downloads fail.
#[derive(Default)]
pub struct HangingRemote {
    pub uploads: AtomicUsize,
}

#[async_trait]
impl RemoteStore for HangingRemote {
    async fn upload(&self, _data: &[u8], _root: &ContentAddress) -> InftResult<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn download(&self, _root: &ContentAddress) -> InftResult<Vec<u8>> {
        Err(InftError::Transport("connection refused".into()))
    }
}

/// Remote tier that rejects everything immediately.
#[derive(Default)]
pub struct FailingRemote {
    pub uploads: AtomicUsize,
}

#[async_trait]
impl RemoteStore for FailingRemote {
    async fn upload(&self, _data: &[u8], _root: &ContentAddress) -> InftResult<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Err(InftError::Transport(format!("upload rejected #{}", n + 1)))
    }

    async fn download(&self, _root: &ContentAddress) -> InftResult<Vec<u8>> {
        Err(InftError::Transport("connection refused".into()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT DOUBLE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Default)]
pub struct MockToken {
    pub owner: Address,
    pub data_hashes: Vec<ContentAddress>,
    pub descriptions: Vec<String>,
    pub authorized: Vec<Address>,
}

#[derive(Default)]
pub struct MockState {
    pub tokens: BTreeMap<U256, MockToken>,
    pub next_token_id: u64,
    pub next_tx: u64,
    /// Preimage proof → content address it commits to. A deployed verifier
    /// only sees the proof, so it records `keccak256("0x…address")` as the
    /// data hash. Registering the address here lets a test act as if the
    /// verifier resolved the preimage; unregistered proofs are recorded
    /// verbatim, as a real contract would.
    pub preimages: HashMap<[u8; 32], ContentAddress>,
    pub submitted: Vec<&'static str>,
    pub update_proofs: Vec<Vec<Bytes>>,
    pub suppress_events: bool,
    pub hang_on_transfer: bool,
    pub fail_reads: bool,
}

/// Contract double that records calls and emits the real event encodings.
#[derive(Default)]
pub struct MockContract {
    pub state: Mutex<MockState>,
}

impl MockContract {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Resolve the preimage proof of `address` back to `address` on mint.
    pub fn expect_preimage(&self, address: ContentAddress) {
        let proof = inft_agent::preimage_proof(&address);
        self.state.lock().unwrap().preimages.insert(proof, address);
    }

    pub fn insert_token(&self, owner: Address, data_hashes: Vec<ContentAddress>) -> U256 {
        let mut state = self.state.lock().unwrap();
        state.next_token_id += 1;
        let id = U256::from(state.next_token_id);
        state.tokens.insert(
            id,
            MockToken {
                owner,
                descriptions: vec![String::new(); data_hashes.len()],
                data_hashes,
                authorized: Vec::new(),
            },
        );
        id
    }

    pub fn token(&self, id: U256) -> Option<MockToken> {
        self.state.lock().unwrap().tokens.get(&id).cloned()
    }

    fn receipt(state: &mut MockState, logs: Vec<Log>) -> TransactionReceipt {
        state.next_tx += 1;
        TransactionReceipt {
            transaction_hash: H256::from_low_u64_be(state.next_tx),
            logs: if state.suppress_events { Vec::new() } else { logs },
            ..Default::default()
        }
    }

    fn read<T>(&self, f: impl FnOnce(&MockState) -> Option<T>) -> InftResult<T> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(InftError::Contract("rpc unavailable".into()));
        }
        f(&*state).ok_or_else(|| InftError::Contract("ERC721: invalid token ID".into()))
    }
}

fn word(id: U256) -> H256 {
    let mut buf = [0u8; 32];
    id.to_big_endian(&mut buf);
    H256::from(buf)
}

pub fn minted_log(id: U256, creator: Address, owner: Address, hashes: &[ContentAddress]) -> Log {
    Log {
        topics: vec![
            MintedFilter::signature(),
            word(id),
            H256::from(creator),
            H256::from(owner),
        ],
        data: encode(&[
            Token::Array(
                hashes
                    .iter()
                    .map(|h| Token::FixedBytes(h.as_bytes().to_vec()))
                    .collect(),
            ),
            Token::Array(Vec::new()),
        ])
        .into(),
        ..Default::default()
    }
}

fn cloned_log(id: U256, new_id: U256, from: Address, to: Address) -> Log {
    Log {
        topics: vec![ClonedFilter::signature(), word(id), word(new_id)],
        data: encode(&[Token::Address(from), Token::Address(to)]).into(),
        ..Default::default()
    }
}

fn new_hashes(proofs: &[Bytes]) -> InftResult<Vec<ContentAddress>> {
    proofs
        .iter()
        .map(|p| TransferProof::from_bytes(p).map(|proof| proof.new_data_hash))
        .collect()
}

#[async_trait]
impl AgentNftContract for MockContract {
    async fn mint(
        &self,
        proofs: Vec<Bytes>,
        descriptions: Vec<String>,
        to: Address,
    ) -> InftResult<TransactionReceipt> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push("mint");

        let hashes: Vec<ContentAddress> = proofs
            .iter()
            .map(|p| {
                let key: [u8; 32] = p.as_ref().try_into().unwrap_or([0u8; 32]);
                state
                    .preimages
                    .get(&key)
                    .copied()
                    .unwrap_or(ContentAddress::from_bytes(key))
            })
            .collect();

        state.next_token_id += 1;
        let id = U256::from(state.next_token_id);
        state.tokens.insert(
            id,
            MockToken {
                owner: to,
                data_hashes: hashes.clone(),
                descriptions,
                authorized: Vec::new(),
            },
        );

        let log = minted_log(id, to, to, &hashes);
        Ok(Self::receipt(&mut state, vec![log]))
    }

    async fn transfer(
        &self,
        to: Address,
        token_id: U256,
        proofs: Vec<Bytes>,
    ) -> InftResult<TransactionReceipt> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.submitted.push("transfer");
            state.hang_on_transfer
        };
        if hang {
            return std::future::pending().await;
        }

        let hashes = new_hashes(&proofs)?;
        let mut state = self.state.lock().unwrap();
        let token = state
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| InftError::Contract("ERC721: invalid token ID".into()))?;
        token.owner = to;
        token.data_hashes = hashes;
        Ok(Self::receipt(&mut state, Vec::new()))
    }

    async fn clone_token(
        &self,
        to: Address,
        token_id: U256,
        proofs: Vec<Bytes>,
    ) -> InftResult<TransactionReceipt> {
        let hashes = new_hashes(&proofs)?;
        let mut state = self.state.lock().unwrap();
        state.submitted.push("clone");

        let source = state
            .tokens
            .get(&token_id)
            .cloned()
            .ok_or_else(|| InftError::Contract("ERC721: invalid token ID".into()))?;

        state.next_token_id += 1;
        let new_id = U256::from(state.next_token_id);
        state.tokens.insert(
            new_id,
            MockToken {
                owner: to,
                data_hashes: hashes,
                descriptions: source.descriptions,
                authorized: Vec::new(),
            },
        );

        let log = cloned_log(token_id, new_id, source.owner, to);
        Ok(Self::receipt(&mut state, vec![log]))
    }

    async fn update(&self, token_id: U256, proofs: Vec<Bytes>) -> InftResult<TransactionReceipt> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push("update");
        if !state.tokens.contains_key(&token_id) {
            return Err(InftError::Contract("ERC721: invalid token ID".into()));
        }
        state.update_proofs.push(proofs);
        Ok(Self::receipt(&mut state, Vec::new()))
    }

    async fn authorize_usage(
        &self,
        token_id: U256,
        user: Address,
    ) -> InftResult<TransactionReceipt> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push("authorizeUsage");
        state
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| InftError::Contract("ERC721: invalid token ID".into()))?
            .authorized
            .push(user);
        Ok(Self::receipt(&mut state, Vec::new()))
    }

    async fn owner_of(&self, token_id: U256) -> InftResult<Address> {
        self.read(|s| s.tokens.get(&token_id).map(|t| t.owner))
    }

    async fn data_hashes_of(&self, token_id: U256) -> InftResult<Vec<H256>> {
        self.read(|s| {
            s.tokens.get(&token_id).map(|t| {
                t.data_hashes
                    .iter()
                    .map(|h| H256::from(*h.as_bytes()))
                    .collect()
            })
        })
    }

    async fn data_descriptions_of(&self, token_id: U256) -> InftResult<Vec<String>> {
        self.read(|s| s.tokens.get(&token_id).map(|t| t.descriptions.clone()))
    }

    async fn authorized_users_of(&self, token_id: U256) -> InftResult<Vec<Address>> {
        self.read(|s| s.tokens.get(&token_id).map(|t| t.authorized.clone()))
    }

    async fn name(&self) -> InftResult<String> {
        self.read(|_| Some("AgentNFT".to_string()))
    }
}
