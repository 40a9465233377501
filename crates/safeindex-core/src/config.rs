//! Service configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::confirmation::ConfirmationPolicy;
use crate::error::IndexingError;

/// Default number of blocks behind head before a block is confirmed.
pub const DEFAULT_REORG_DEPTH: u64 = 10;

/// Default number of blocks replayed per reindex chunk.
pub const DEFAULT_REINDEX_CHUNK_SIZE: u64 = 100;

/// Which indexer strategy the network needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Full trace support: index internal transactions from `trace_filter`.
    #[default]
    L1,
    /// Tracing is too expensive or unavailable: index Safe events instead.
    L2,
}

impl NetworkMode {
    pub fn is_l2(&self) -> bool {
        matches!(self, Self::L2)
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L1 => write!(f, "l1"),
            Self::L2 => write!(f, "l2"),
        }
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = IndexingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1" | "traces" => Ok(Self::L1),
            "l2" | "events" => Ok(Self::L2),
            other => Err(IndexingError::Config(format!("unknown network mode '{other}'"))),
        }
    }
}

/// Configuration for an `IndexService` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexServiceConfig {
    /// JSON-RPC endpoint of the chain node.
    pub node_url: String,
    /// Blocks behind head before a block is considered final.
    /// Typical values: 10 (mainnet), 1 (fast L2s).
    pub reorg_depth: u64,
    /// Indexer strategy.
    pub network_mode: NetworkMode,
    /// Default chunk size for `reindex_master_copies`.
    pub reindex_chunk_size: u64,
    /// Maximum requests per JSON-RPC batch call.
    pub rpc_batch_size: usize,
    /// Per-request HTTP timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Storage location (`sqlite:` URL or file path). `None` = in-memory.
    pub database_url: Option<String>,
}

impl Default for IndexServiceConfig {
    fn default() -> Self {
        Self {
            node_url: "http://localhost:8545".into(),
            reorg_depth: DEFAULT_REORG_DEPTH,
            network_mode: NetworkMode::L1,
            reindex_chunk_size: DEFAULT_REINDEX_CHUNK_SIZE,
            rpc_batch_size: 100,
            request_timeout_ms: 30_000,
            database_url: None,
        }
    }
}

impl IndexServiceConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexingError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexingError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| IndexingError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service misbehave.
    pub fn validate(&self) -> Result<(), IndexingError> {
        if self.node_url.is_empty() {
            return Err(IndexingError::Config("node_url must not be empty".into()));
        }
        if self.reindex_chunk_size == 0 {
            return Err(IndexingError::Config("reindex_chunk_size must be > 0".into()));
        }
        if self.rpc_batch_size == 0 {
            return Err(IndexingError::Config("rpc_batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// The confirmation policy implied by `reorg_depth`.
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy::new(self.reorg_depth)
    }
}
