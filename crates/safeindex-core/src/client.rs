//! The chain data fetcher contract.
//!
//! Every lookup returns `Ok(None)` when the node does not know the object,
//! and `Err` only for transport or protocol failures. Callers decide whether
//! an absent value is worth a retry.

use async_trait::async_trait;

use crate::error::IndexingError;
use crate::types::{RawBlock, RawLog, RawTrace, RawTransaction, TransactionReceipt};

/// Trait for fetching chain data from an Ethereum-compatible node.
///
/// Batch variants return one entry per requested hash, in request order.
/// The default implementations issue the single-item calls sequentially;
/// transports with real batching override them.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head block number.
    async fn current_block_number(&self) -> Result<u64, IndexingError>;

    async fn get_block(&self, block_hash: &str) -> Result<Option<RawBlock>, IndexingError>;

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<RawTransaction>, IndexingError>;

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, IndexingError>;

    /// Logs emitted by `addresses` with `topics[0]` in `topic0s`, in the
    /// inclusive range `[from_block, to_block]`.
    /// An empty list on either filter means "any".
    async fn get_logs(
        &self,
        addresses: &[String],
        topic0s: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, IndexingError>;

    /// Call frames targeting `to_addresses` in the inclusive range `[from_block, to_block]`.
    async fn trace_filter(
        &self,
        to_addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawTrace>, IndexingError>;

    async fn get_blocks(
        &self,
        block_hashes: &[String],
    ) -> Result<Vec<Option<RawBlock>>, IndexingError> {
        let mut out = Vec::with_capacity(block_hashes.len());
        for hash in block_hashes {
            out.push(self.get_block(hash).await?);
        }
        Ok(out)
    }

    async fn get_transactions(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Option<RawTransaction>>, IndexingError> {
        let mut out = Vec::with_capacity(tx_hashes.len());
        for hash in tx_hashes {
            out.push(self.get_transaction(hash).await?);
        }
        Ok(out)
    }

    async fn get_transaction_receipts(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Option<TransactionReceipt>>, IndexingError> {
        let mut out = Vec::with_capacity(tx_hashes.len());
        for hash in tx_hashes {
            out.push(self.get_transaction_receipt(hash).await?);
        }
        Ok(out)
    }
}
