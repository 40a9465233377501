//! Error types for the indexing and reconciliation pipeline.

use thiserror::Error;

/// Errors that can occur while indexing, reconciling, or reprocessing.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// The node has no record of the transaction (or its receipt), even after a retry.
    #[error("Cannot find transaction with tx-hash={tx_hash}")]
    TransactionNotFound { tx_hash: String },

    /// The transaction exists but is not mined yet.
    #[error("Cannot find block for transaction with tx-hash={tx_hash}")]
    TransactionWithoutBlock { tx_hash: String },

    /// A block referenced by a transaction could not be resolved.
    #[error("Block with hash={block_hash} was not found")]
    BlockNotFound { block_hash: String },

    /// A transaction row with this hash already exists.
    ///
    /// Raised by stores on a unique-key violation.
    #[error("Transaction with tx-hash={tx_hash} already exists")]
    DuplicateTransaction { tx_hash: String },

    #[error("Invalid block range: to_block {to_block} must be greater than from_block {from_block}")]
    InvalidBlockRange { from_block: u64, to_block: u64 },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexingError {
    /// Returns `true` if the error is a unique-key violation on transaction creation.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateTransaction { .. })
    }

    /// Returns `true` if the transaction is known but still pending.
    ///
    /// Callers should retry the whole operation later rather than busy-loop.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::TransactionWithoutBlock { .. })
    }

    /// Returns `true` for errors raised before any work was started.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::InvalidBlockRange { .. } | Self::InvalidChunkSize)
    }
}
