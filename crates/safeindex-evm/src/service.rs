//! The reconciliation engine.
//!
//! [`IndexService`] turns block and transaction hashes into persisted,
//! block-linked rows. Local rows are preferred; misses are fetched from the
//! node, the `confirmed` flag is derived from the reorg depth, and concurrent
//! writers are reconciled optimistically (insert, on duplicate adopt and merge).
//!
//! It also owns the reprocess controller, which invalidates derived state in
//! one atomic unit of work so the decoder regenerates it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use safeindex_core::client::ChainClient;
use safeindex_core::config::NetworkMode;
use safeindex_core::confirmation::ConfirmationPolicy;
use safeindex_core::derived::{AddressScope, ReprocessSummary};
use safeindex_core::error::IndexingError;
use safeindex_core::store::{DerivedStateTx, IndexStore};
use safeindex_core::types::{
    EthereumBlock, EthereumTx, RawBlock, RawTransaction, TransactionReceipt,
};

/// Blockchain-state reconciliation engine.
pub struct IndexService {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn IndexStore>,
    policy: ConfirmationPolicy,
    network_mode: NetworkMode,
    reindex_chunk_size: u64,
}

impl IndexService {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn IndexStore>,
        policy: ConfirmationPolicy,
        network_mode: NetworkMode,
        reindex_chunk_size: u64,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            network_mode,
            reindex_chunk_size,
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode
    }

    /// Default chunk size for reindexing.
    pub fn reindex_chunk_size(&self) -> u64 {
        self.reindex_chunk_size
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    /// Return the stored block, fetching and persisting it on a miss.
    pub async fn get_or_fetch_block(&self, block_hash: &str) -> Result<EthereumBlock, IndexingError> {
        let block_hash = normalize_hash(block_hash);
        let block_hash = block_hash.as_str();
        if let Some(block) = self.store.get_block(block_hash).await? {
            debug!(block_hash, "block cache hit");
            return Ok(block);
        }

        let head = self.client.current_block_number().await?;
        let first = self.client.get_block(block_hash).await?;
        let raw = self.block_with_retry(block_hash, first).await?;
        self.persist_block(&raw, head).await
    }

    /// Mark every stored block at least `reorg_depth` behind the head as
    /// confirmed. Returns the number of blocks upgraded.
    pub async fn confirm_blocks(&self) -> Result<u64, IndexingError> {
        let head = self.client.current_block_number().await?;
        let Some(tip) = self.policy.confirmed_tip(head) else {
            return Ok(0);
        };
        let confirmed = self.store.confirm_blocks(tip).await?;
        info!(head, tip, confirmed, "blocks confirmed");
        Ok(confirmed)
    }

    async fn persist_block(&self, raw: &RawBlock, head: u64) -> Result<EthereumBlock, IndexingError> {
        let confirmed = self.policy.is_confirmed(raw.number, head);
        let block = self.store.get_or_create_block(raw, confirmed).await?;
        debug!(number = block.number, hash = %block.block_hash, confirmed, "block stored");
        Ok(block)
    }

    // ── Transactions ──────────────────────────────────────────────────────────

    /// Return the stored, block-linked transaction, fetching it on a miss.
    ///
    /// A stored transaction without a block (observed while pending) is
    /// linked to its block in place.
    pub async fn get_or_fetch_transaction(&self, tx_hash: &str) -> Result<EthereumTx, IndexingError> {
        let tx_hash = normalize_hash(tx_hash);
        let tx_hash = tx_hash.as_str();
        if let Some(stored) = self.store.get_transaction(tx_hash).await? {
            if stored.is_mined() {
                debug!(tx_hash, "transaction cache hit");
                return Ok(stored);
            }
            let first = self.client.get_transaction_receipt(tx_hash).await?;
            let receipt = self.receipt_with_retry(tx_hash, first).await?;
            let block = self.get_or_fetch_block(receipt_block_hash(&receipt)?).await?;
            return self
                .store
                .update_transaction_block_and_receipt(tx_hash, &block, &receipt)
                .await;
        }

        let first = self.client.get_transaction_receipt(tx_hash).await?;
        let receipt = self.receipt_with_retry(tx_hash, first).await?;
        let block = self.get_or_fetch_block(receipt_block_hash(&receipt)?).await?;
        let first = self.client.get_transaction(tx_hash).await?;
        let tx = self.transaction_with_retry(tx_hash, first).await?;

        self.create_or_merge(&tx, &receipt, &block).await
    }

    /// Resolve many hashes at once with batched node calls.
    ///
    /// The result follows the input order with duplicates removed (first
    /// occurrence wins, hashes compared case-insensitively). Any hash that
    /// cannot be resolved aborts the batch.
    pub async fn get_or_fetch_transactions_batch(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<EthereumTx>, IndexingError> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = tx_hashes
            .iter()
            .map(|h| normalize_hash(h))
            .filter(|h| seen.insert(h.clone()))
            .collect();
        if unique.is_empty() {
            return Ok(vec![]);
        }

        let mut resolved: HashMap<String, EthereumTx> = self
            .store
            .get_mined_transactions(&unique)
            .await?
            .into_iter()
            .map(|tx| (normalize_hash(&tx.tx_hash), tx))
            .collect();

        let missing: Vec<String> = unique
            .iter()
            .filter(|h| !resolved.contains_key(*h))
            .cloned()
            .collect();

        debug!(
            requested = tx_hashes.len(),
            unique = unique.len(),
            cached = resolved.len(),
            missing = missing.len(),
            "resolving transaction batch"
        );

        if !missing.is_empty() {
            for tx in self.fetch_and_store(&missing).await? {
                resolved.insert(normalize_hash(&tx.tx_hash), tx);
            }
        }

        unique
            .into_iter()
            .map(|hash| {
                resolved
                    .remove(&hash)
                    .ok_or(IndexingError::TransactionNotFound { tx_hash: hash })
            })
            .collect()
    }

    async fn fetch_and_store(&self, missing: &[String]) -> Result<Vec<EthereumTx>, IndexingError> {
        let mut receipts_raw = self.client.get_transaction_receipts(missing).await?;
        receipts_raw.resize(missing.len(), None);
        let mut receipts = Vec::with_capacity(missing.len());
        for (hash, first) in missing.iter().zip(receipts_raw) {
            receipts.push(self.receipt_with_retry(hash, first).await?);
        }

        let mut txs_raw = self.client.get_transactions(missing).await?;
        txs_raw.resize(missing.len(), None);
        let mut txs = Vec::with_capacity(missing.len());
        for (hash, first) in missing.iter().zip(txs_raw) {
            txs.push(self.transaction_with_retry(hash, first).await?);
        }

        // Blocks are taken from the transactions, in first-seen order.
        let mut seen = HashSet::new();
        let mut block_hashes: Vec<String> = Vec::new();
        for tx in &txs {
            let hash = tx_block_hash(tx)?;
            if seen.insert(hash.clone()) {
                block_hashes.push(hash);
            }
        }
        let mut blocks_raw = self.client.get_blocks(&block_hashes).await?;
        blocks_raw.resize(block_hashes.len(), None);
        let mut raw_blocks: HashMap<String, RawBlock> = HashMap::with_capacity(block_hashes.len());
        for (hash, first) in block_hashes.iter().zip(blocks_raw) {
            let block = self.block_with_retry(hash, first).await?;
            raw_blocks.insert(hash.clone(), block);
        }

        // One height snapshot for the whole batch.
        let head = self.client.current_block_number().await?;

        let mut stored_blocks: HashMap<String, EthereumBlock> = HashMap::new();
        let mut out = Vec::with_capacity(missing.len());
        for (tx, receipt) in txs.iter().zip(&receipts) {
            let block_hash = tx_block_hash(tx)?;
            let block = match stored_blocks.get(&block_hash) {
                Some(block) => block.clone(),
                None => {
                    let raw = raw_blocks.get(&block_hash).ok_or_else(|| {
                        IndexingError::BlockNotFound {
                            block_hash: block_hash.clone(),
                        }
                    })?;
                    let block = self.persist_block(raw, head).await?;
                    stored_blocks.insert(block_hash, block.clone());
                    block
                }
            };
            out.push(self.create_or_merge(tx, receipt, &block).await?);
        }

        info!(
            created = out.len(),
            blocks = stored_blocks.len(),
            head,
            "transaction batch stored"
        );
        Ok(out)
    }

    /// Insert a mined transaction; if another writer got there first, link
    /// the existing row to the block and receipt instead.
    async fn create_or_merge(
        &self,
        tx: &RawTransaction,
        receipt: &TransactionReceipt,
        block: &EthereumBlock,
    ) -> Result<EthereumTx, IndexingError> {
        match self.store.create_transaction(tx, receipt, block).await {
            Ok(row) => Ok(row),
            Err(e) if e.is_duplicate() => {
                debug!(tx_hash = %tx.hash, "transaction already stored, merging");
                self.store
                    .update_transaction_block_and_receipt(&tx.hash, block, receipt)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    // ── Single-shot retries ───────────────────────────────────────────────────

    async fn receipt_with_retry(
        &self,
        tx_hash: &str,
        first: Option<TransactionReceipt>,
    ) -> Result<TransactionReceipt, IndexingError> {
        if let Some(receipt) = first.filter(TransactionReceipt::is_mined) {
            return Ok(receipt);
        }
        warn!(tx_hash, "receipt missing or not mined, retrying once");
        match self.client.get_transaction_receipt(tx_hash).await? {
            Some(receipt) if receipt.is_mined() => Ok(receipt),
            Some(_) => Err(IndexingError::TransactionWithoutBlock {
                tx_hash: tx_hash.to_string(),
            }),
            None => Err(IndexingError::TransactionNotFound {
                tx_hash: tx_hash.to_string(),
            }),
        }
    }

    async fn transaction_with_retry(
        &self,
        tx_hash: &str,
        first: Option<RawTransaction>,
    ) -> Result<RawTransaction, IndexingError> {
        if let Some(tx) = first.filter(|tx| tx.block_hash.is_some()) {
            return Ok(tx);
        }
        warn!(tx_hash, "transaction missing or not mined, retrying once");
        match self.client.get_transaction(tx_hash).await? {
            Some(tx) if tx.block_hash.is_some() => Ok(tx),
            Some(_) => Err(IndexingError::TransactionWithoutBlock {
                tx_hash: tx_hash.to_string(),
            }),
            None => Err(IndexingError::TransactionNotFound {
                tx_hash: tx_hash.to_string(),
            }),
        }
    }

    async fn block_with_retry(
        &self,
        block_hash: &str,
        first: Option<RawBlock>,
    ) -> Result<RawBlock, IndexingError> {
        if let Some(block) = first {
            return Ok(block);
        }
        warn!(block_hash, "block missing, retrying once");
        self.client
            .get_block(block_hash)
            .await?
            .ok_or_else(|| IndexingError::BlockNotFound {
                block_hash: block_hash.to_string(),
            })
    }

    // ── Reprocess ─────────────────────────────────────────────────────────────

    /// Invalidate derived state for `addresses`. Empty input is a no-op.
    pub async fn reprocess_addresses(
        &self,
        addresses: &[String],
    ) -> Result<ReprocessSummary, IndexingError> {
        if addresses.is_empty() {
            debug!("no addresses to reprocess");
            return Ok(ReprocessSummary::default());
        }
        self.reprocess(AddressScope::only(addresses)).await
    }

    /// Invalidate derived state for every address.
    pub async fn reprocess_all(&self) -> Result<ReprocessSummary, IndexingError> {
        self.reprocess(AddressScope::All).await
    }

    async fn reprocess(&self, scope: AddressScope) -> Result<ReprocessSummary, IndexingError> {
        let mut unit = self.store.begin_derived().await?;

        match invalidate(unit.as_mut(), &scope).await {
            Ok(summary) => {
                unit.commit().await?;
                info!(
                    scope = %scope,
                    confirmations = summary.confirmations_deleted,
                    multisig_txs = summary.multisig_txs_deleted,
                    module_txs = summary.module_txs_deleted,
                    safe_statuses = summary.safe_statuses_deleted,
                    internal_txs = summary.internal_txs_marked,
                    "derived state invalidated"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed reprocess");
                }
                Err(e)
            }
        }
    }
}

/// The invalidation sequence. Runs inside one unit of work.
async fn invalidate(
    unit: &mut dyn DerivedStateTx,
    scope: &AddressScope,
) -> Result<ReprocessSummary, IndexingError> {
    Ok(ReprocessSummary {
        confirmations_deleted: unit.delete_onchain_confirmations(scope).await?,
        multisig_txs_deleted: unit.delete_indexed_multisig_txs(scope).await?,
        module_txs_deleted: unit.delete_module_txs(scope).await?,
        safe_statuses_deleted: unit.delete_safe_statuses(scope).await?,
        internal_txs_marked: unit.mark_internal_txs_unprocessed(scope).await?,
    })
}

/// Hashes are compared and stored in lowercase hex.
fn normalize_hash(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

fn tx_block_hash(tx: &RawTransaction) -> Result<String, IndexingError> {
    tx.block_hash
        .as_deref()
        .map(normalize_hash)
        .ok_or_else(|| IndexingError::TransactionWithoutBlock {
            tx_hash: tx.hash.clone(),
        })
}

fn receipt_block_hash(receipt: &TransactionReceipt) -> Result<&str, IndexingError> {
    receipt
        .block_hash
        .as_deref()
        .ok_or_else(|| IndexingError::TransactionWithoutBlock {
            tx_hash: receipt.transaction_hash.clone(),
        })
}
