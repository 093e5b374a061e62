//! inft-cli
//!
//! Operator commands over the inft-agent library.
//!
//! Storage, metadata and proof commands only need the storage settings.
//! Token commands also need `ZG_PRIVATE_KEY` and `AGENT_NFT_CONTRACT_ADDRESS`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, U256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use inft_agent::{
    parse_proof, validate_proof, AgentMetadata, AgentRegistryClient, ContentAddress, DataKey,
    FallbackPatch, InftConfig, InftContext, KeyRing, KeySlot, MetadataPatch, RecipientPublicKey,
};

const DEFAULT_LOG_FILTER: &str = "inft_agent=info,inft_cli=info";
const DEFAULT_MAX_AGE_DAYS: u32 = 30;

#[derive(Parser)]
#[command(
    name = "inft-cli",
    about = "Operator commands for intelligent-NFT agent storage, proofs and tokens"
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file and print its content address.
    Store(StoreArgs),
    /// Fetch an object by content address.
    Retrieve(RetrieveArgs),
    /// Purge local-tier objects older than the given age.
    Cleanup(CleanupArgs),
    /// Encrypt agent metadata from a JSON file and store it.
    Create(CreateArgs),
    /// Decrypt stored agent metadata.
    Decrypt(DecryptArgs),
    /// Inspect transfer proofs.
    #[command(subcommand)]
    Proof(ProofCommand),
    /// Operations against the agent NFT contract.
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Args)]
struct StoreArgs {
    file: PathBuf,
    /// Write to the local tier only.
    #[arg(long)]
    local: bool,
}

#[derive(Args)]
struct RetrieveArgs {
    address: ContentAddress,
    /// Write the bytes here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct CleanupArgs {
    #[arg(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
    max_age_days: u32,
}

#[derive(Args)]
struct CreateArgs {
    /// Agent metadata JSON.
    file: PathBuf,
    /// Public key the data key is sealed for (64 or 65 byte hex).
    #[arg(long)]
    public_key: RecipientPublicKey,
}

#[derive(Args)]
struct DecryptArgs {
    address: ContentAddress,
    /// Hex data key.
    #[arg(long, value_parser = parse_key)]
    key: DataKey,
}

#[derive(Subcommand)]
enum ProofCommand {
    /// Check the shape of a hex proof.
    Validate { proof: String },
    /// Decode a hex proof into its fields.
    Parse { proof: String },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Owner, data hashes, descriptions and authorized users.
    Info {
        #[arg(value_parser = parse_token_id)]
        token_id: U256,
    },
    /// Check that the contract answers.
    Ready,
    /// Mint a token from an agent metadata JSON file.
    Mint {
        file: PathBuf,
        /// Recipient; defaults to the operator.
        #[arg(long, value_parser = parse_address)]
        to: Option<Address>,
    },
    /// Re-encrypt every item for the recipient and transfer the token.
    Transfer {
        #[arg(value_parser = parse_token_id)]
        token_id: U256,
        #[arg(value_parser = parse_address)]
        to: Address,
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Clone the token for a recipient.
    Clone {
        #[arg(value_parser = parse_token_id)]
        token_id: U256,
        #[arg(value_parser = parse_address)]
        to: Address,
        /// Metadata patch JSON applied to each cloned item.
        #[arg(long)]
        patch: Option<PathBuf>,
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Apply a metadata patch and record the new version on chain.
    Update {
        #[arg(value_parser = parse_token_id)]
        token_id: U256,
        /// Metadata patch JSON.
        patch: PathBuf,
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Authorize a user on a token.
    Authorize {
        #[arg(value_parser = parse_token_id)]
        token_id: U256,
        #[arg(value_parser = parse_address)]
        user: Address,
    },
}

/// Explicit data keys. When none are given, keys are derived from the
/// operator identity.
#[derive(Args, Default)]
struct KeyArgs {
    /// Data key of the next item, in item order. Repeatable.
    #[arg(long = "item-key", value_parser = parse_key)]
    item_keys: Vec<DataKey>,
    /// Data key for whole-token operations.
    #[arg(long, value_parser = parse_key)]
    token_key: Option<DataKey>,
}

impl KeyArgs {
    fn is_empty(&self) -> bool {
        self.item_keys.is_empty() && self.token_key.is_none()
    }

    fn into_ring(self, token_id: U256) -> KeyRing {
        let ring = KeyRing::new();
        for (index, key) in self.item_keys.into_iter().enumerate() {
            ring.insert(token_id, KeySlot::Item(index), key);
        }
        if let Some(key) = self.token_key {
            ring.insert(token_id, KeySlot::Token, key);
        }
        ring
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing(cli.json_logs);

    let config = InftConfig::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Store(args) => store(&config, args).await,
        Commands::Retrieve(args) => retrieve(&config, args).await,
        Commands::Cleanup(args) => cleanup(&config, args).await,
        Commands::Create(args) => create(&config, args).await,
        Commands::Decrypt(args) => decrypt(&config, args).await,
        Commands::Proof(command) => proof(command),
        Commands::Token(command) => token(&config, command).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE AND METADATA
// ═══════════════════════════════════════════════════════════════════════════════

async fn store(config: &InftConfig, args: StoreArgs) -> Result<()> {
    let context = InftContext::open(config).await?;
    if args.local {
        context.storage().set_fallback_config(FallbackPatch {
            prefer_local: Some(true),
            ..Default::default()
        });
    }

    let data = read_file(&args.file).await?;
    let result = context.storage().store(&data).await?;
    print_json(&result)
}

async fn retrieve(config: &InftConfig, args: RetrieveArgs) -> Result<()> {
    let context = InftContext::open(config).await?;
    let data = context.storage().retrieve(&args.address).await?;

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, &data)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}", data.len(), path.display());
        }
        None => std::io::stdout()
            .write_all(&data)
            .context("failed to write to stdout")?,
    }
    Ok(())
}

async fn cleanup(config: &InftConfig, args: CleanupArgs) -> Result<()> {
    let context = InftContext::open(config).await?;
    let report = context.storage().cleanup_local(args.max_age_days).await?;
    print_json(&report)
}

async fn create(config: &InftConfig, args: CreateArgs) -> Result<()> {
    let metadata: AgentMetadata = read_json(&args.file).await?;
    let context = InftContext::open(config).await?;
    let created = context
        .metadata()
        .create_agent(&metadata, &args.public_key)
        .await?;

    print_json(&json!({
        "contentAddress": created.content_address,
        "sealedKey": created.sealed_key.to_string(),
        "key": hex::encode(created.key.as_bytes()),
        "transactionReference": created.transaction_reference,
    }))
}

async fn decrypt(config: &InftConfig, args: DecryptArgs) -> Result<()> {
    let context = InftContext::open(config).await?;
    let retrieved = context
        .metadata()
        .retrieve_agent(&args.address, &args.key)
        .await?;

    print_json(&json!({
        "metadata": retrieved.metadata,
        "isValid": retrieved.is_valid,
    }))
}

fn proof(command: ProofCommand) -> Result<()> {
    match command {
        ProofCommand::Validate { proof } => print_json(&json!({ "valid": validate_proof(&proof) })),
        ProofCommand::Parse { proof } => {
            let parsed = parse_proof(&proof)?;
            print_json(&json!({
                "oldDataHash": parsed.old_data_hash,
                "newDataHash": parsed.new_data_hash,
                "recipientPublicKey": parsed.recipient.to_string(),
                "sealedKey": parsed.sealed_key.to_string(),
            }))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════════

async fn registry(config: &InftConfig, token_id: U256, keys: KeyArgs) -> Result<AgentRegistryClient> {
    config.chain.validate()?;
    let context = InftContext::open(config).await?;

    let client = if keys.is_empty() {
        context.registry()?
    } else {
        context.registry_with_custody(Arc::new(keys.into_ring(token_id)))?
    };
    info!("Operator {:?}", client.address());
    Ok(client)
}

async fn token(config: &InftConfig, command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Info { token_id } => {
            let client = registry(config, token_id, KeyArgs::default()).await?;
            print_json(&client.token_info(token_id).await?)
        }
        TokenCommand::Ready => {
            let client = registry(config, U256::zero(), KeyArgs::default()).await?;
            print_json(&json!({ "ready": client.is_ready().await }))
        }
        TokenCommand::Mint { file, to } => {
            let metadata: AgentMetadata = read_json(&file).await?;
            let client = registry(config, U256::zero(), KeyArgs::default()).await?;
            let outcome = client.mint(&metadata, to, None).await?;

            print_json(&json!({
                "tokenId": outcome.token_id.to_string(),
                "txHash": outcome.tx_hash,
                "contentAddress": outcome.content_address,
                "sealedKey": outcome.sealed_key.to_string(),
            }))
        }
        TokenCommand::Transfer { token_id, to, keys } => {
            let client = registry(config, token_id, keys).await?;
            let tx_hash = client.transfer(token_id, to).await?;
            print_json(&json!({ "txHash": tx_hash }))
        }
        TokenCommand::Clone {
            token_id,
            to,
            patch,
            keys,
        } => {
            let patch: Option<MetadataPatch> = match patch {
                Some(path) => Some(read_json(&path).await?),
                None => None,
            };
            let client = registry(config, token_id, keys).await?;
            let outcome = client.clone(token_id, to, patch.as_ref()).await?;

            print_json(&json!({
                "newTokenId": outcome.new_token_id.to_string(),
                "txHash": outcome.tx_hash,
                "newDataHashes": outcome.plan.new_addresses,
            }))
        }
        TokenCommand::Update {
            token_id,
            patch,
            keys,
        } => {
            let patch: MetadataPatch = read_json(&patch).await?;
            let client = registry(config, token_id, keys).await?;
            let tx_hash = client.update(token_id, &patch).await?;
            print_json(&json!({ "txHash": tx_hash }))
        }
        TokenCommand::Authorize { token_id, user } => {
            let client = registry(config, token_id, KeyArgs::default()).await?;
            let tx_hash = client.authorize_usage(token_id, user).await?;
            print_json(&json!({ "txHash": tx_hash }))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = read_file(path).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_token_id(s: &str) -> Result<U256, String> {
    match s.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(s).map_err(|e| format!("{e:?}")),
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse()
        .map_err(|_| format!("invalid address {s:?}: expected 0x-prefixed 20-byte hex"))
}

fn parse_key(s: &str) -> Result<DataKey, String> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| e.to_string())?;
    DataKey::from_slice(&bytes).map_err(|e| e.to_string())
}
