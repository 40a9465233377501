//! safeindex CLI: reindex, reprocess and inspect indexed Safe state.
//!
//! Usage:
//! ```bash
//! safeindex reindex        --from 17000000 --to 17100000 --chunk-size 500
//! safeindex reindex        --from 0 --address 0xd9Db270c1B5E3Bd161E8c8503c55cEABeE709552
//! safeindex reprocess      --address 0xSafe1 --address 0xSafe2
//! safeindex reprocess      --all
//! safeindex fetch-tx       0xabc... 0xdef...
//! safeindex fetch-block    0x123...
//! safeindex confirm-blocks
//! safeindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use safeindex_core::config::{IndexServiceConfig, NetworkMode};
use safeindex_core::store::DerivedStore;
use safeindex_evm::{open_store, IndexService, IndexServiceBuilder};

mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "safeindex",
    about = "Safe indexing and reconciliation engine",
    long_about = "
Keeps a local store of blocks, transactions and derived Safe state in sync
with an Ethereum-compatible node, tolerating reorgs and duplicate writers.

ENVIRONMENT VARIABLES:
  SAFEINDEX_NODE_URL   JSON-RPC endpoint of the node
  SAFEINDEX_DB         SQLite database path (in-memory when unset)
  RUST_LOG             Overrides --log-level
",
    version
)]
struct Cli {
    /// JSON config file (service settings plus an optional `log` section)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint
    #[arg(long, global = true, env = "SAFEINDEX_NODE_URL")]
    node_url: Option<String>,

    /// SQLite database path or URL
    #[arg(long, global = true, env = "SAFEINDEX_DB")]
    db: Option<String>,

    /// l1 (traces) or l2 (events)
    #[arg(long, global = true)]
    network_mode: Option<NetworkMode>,

    /// Blocks behind head before a block is confirmed
    #[arg(long, global = true)]
    reorg_depth: Option<u64>,

    /// Global log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a block range through the network's indexer
    Reindex {
        /// First block (inclusive)
        #[arg(long)]
        from: u64,
        /// Last block (exclusive); defaults to the chain head
        #[arg(long)]
        to: Option<u64>,
        /// Blocks per chunk
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Only these addresses (repeatable); defaults to every tracked address
        #[arg(long = "address")]
        addresses: Vec<String>,
    },

    /// Invalidate derived state so the decoder regenerates it
    #[command(group(ArgGroup::new("scope").required(true).args(["addresses", "all"])))]
    Reprocess {
        /// Safe address (repeatable)
        #[arg(long = "address")]
        addresses: Vec<String>,
        /// Every Safe
        #[arg(long)]
        all: bool,
    },

    /// Resolve transactions into stored, block-linked rows
    #[command(name = "fetch-tx")]
    FetchTx {
        #[arg(required = true)]
        hashes: Vec<String>,
    },

    /// Resolve a block into a stored row
    #[command(name = "fetch-block")]
    FetchBlock { hash: String },

    /// Mark stored blocks that are now deep enough as confirmed
    #[command(name = "confirm-blocks")]
    ConfirmBlocks,

    /// Show the effective configuration and store row counts
    Info,
}

/// Contents of `--config`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    service: IndexServiceConfig,
    #[serde(default)]
    log: LogConfig,
}

impl Cli {
    fn resolve_config(&self) -> Result<FileConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str::<FileConfig>(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        if let Some(url) = &self.node_url {
            config.service.node_url = url.clone();
        }
        if let Some(db) = &self.db {
            config.service.database_url = Some(db.clone());
        }
        if let Some(mode) = self.network_mode {
            config.service.network_mode = mode;
        }
        if let Some(depth) = self.reorg_depth {
            config.service.reorg_depth = depth;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.json_logs {
            config.log.json = true;
        }

        config.service.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_tracing(&config.log);

    let (index_store, derived_store) = open_store(config.service.database_url.as_deref())
        .await
        .context("opening store")?;
    let service = Arc::new(
        IndexServiceBuilder::from_config(config.service.clone())
            .store(index_store)
            .build()
            .await
            .context("building index service")?,
    );

    match cli.command {
        Commands::Reindex {
            from,
            to,
            chunk_size,
            addresses,
        } => cmd_reindex(&service, from, to, chunk_size, addresses).await,
        Commands::Reprocess { addresses, all } => cmd_reprocess(&service, addresses, all).await,
        Commands::FetchTx { hashes } => cmd_fetch_tx(&service, &hashes).await,
        Commands::FetchBlock { hash } => {
            let block = service
                .get_or_fetch_block(&hash)
                .await
                .with_context(|| format!("fetching block {hash}"))?;
            print_json(&block)
        }
        Commands::ConfirmBlocks => {
            let confirmed = service.confirm_blocks().await.context("confirming blocks")?;
            println!("{confirmed} block(s) confirmed");
            Ok(())
        }
        Commands::Info => cmd_info(&config, derived_store.as_ref()).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_reindex(
    service: &Arc<IndexService>,
    from: u64,
    to: Option<u64>,
    chunk_size: Option<u64>,
    addresses: Vec<String>,
) -> Result<()> {
    let addresses = (!addresses.is_empty()).then_some(addresses);
    let report = service
        .reindex_master_copies(from, to, chunk_size, addresses)
        .await
        .context("reindexing")?;
    print_json(&report)
}

async fn cmd_reprocess(service: &IndexService, addresses: Vec<String>, all: bool) -> Result<()> {
    let summary = if all {
        service.reprocess_all().await
    } else {
        service.reprocess_addresses(&addresses).await
    }
    .context("reprocessing")?;
    print_json(&summary)
}

async fn cmd_fetch_tx(service: &IndexService, hashes: &[String]) -> Result<()> {
    if let [hash] = hashes {
        let tx = service
            .get_or_fetch_transaction(hash)
            .await
            .with_context(|| format!("fetching transaction {hash}"))?;
        return print_json(&tx);
    }
    let txs = service
        .get_or_fetch_transactions_batch(hashes)
        .await
        .context("fetching transaction batch")?;
    print_json(&txs)
}

async fn cmd_info(config: &FileConfig, store: &dyn DerivedStore) -> Result<()> {
    let counts = store.derived_counts().await.context("reading row counts")?;
    println!("SafeIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Node:          {}", config.service.node_url);
    println!("  Network mode:  {}", config.service.network_mode);
    println!("  Reorg depth:   {} blocks", config.service.reorg_depth);
    println!("  Reindex chunk: {} blocks", config.service.reindex_chunk_size);
    println!(
        "  Store:         {}",
        config.service.database_url.as_deref().unwrap_or("memory")
    );
    println!();
    print_json(&counts)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
