//! Local store contracts.
//!
//! [`IndexStore`] is what the reconciliation engine, the reprocess controller
//! and the indexers need. [`DerivedStore`] is the write/read side used by the
//! decoder and by operators inspecting derived state.
//!
//! Implementations: `InMemoryStore` and `SqliteStore` in `safeindex-storage`.

use async_trait::async_trait;

use crate::derived::{
    AddressScope, InternalTx, InternalTxDecoded, ModuleTransaction, MultisigConfirmation,
    MultisigTransaction, SafeStatus,
};
use crate::error::IndexingError;
use crate::types::{EthereumBlock, EthereumTx, RawBlock, RawTransaction, TransactionReceipt};

/// Storage for blocks, transactions and the indexers' raw output.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_block(&self, block_hash: &str) -> Result<Option<EthereumBlock>, IndexingError>;

    /// Insert the block if absent, otherwise return the stored row.
    ///
    /// A stored unconfirmed block is upgraded to confirmed when `confirmed` is
    /// `true`; a confirmed block is never downgraded.
    async fn get_or_create_block(
        &self,
        block: &RawBlock,
        confirmed: bool,
    ) -> Result<EthereumBlock, IndexingError>;

    /// Mark every block with `number <= up_to_number` as confirmed.
    /// Returns the number of rows changed.
    async fn confirm_blocks(&self, up_to_number: u64) -> Result<u64, IndexingError>;

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<EthereumTx>, IndexingError>;

    /// Stored transactions among `tx_hashes` that are linked to a block.
    /// Order of the result is unspecified.
    async fn get_mined_transactions(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<EthereumTx>, IndexingError>;

    /// Insert a mined transaction.
    ///
    /// Fails with [`IndexingError::DuplicateTransaction`] if the hash exists.
    async fn create_transaction(
        &self,
        tx: &RawTransaction,
        receipt: &TransactionReceipt,
        block: &EthereumBlock,
    ) -> Result<EthereumTx, IndexingError>;

    /// Insert a transaction observed before being mined.
    ///
    /// Fails with [`IndexingError::DuplicateTransaction`] if the hash exists.
    async fn create_pending_transaction(
        &self,
        tx: &RawTransaction,
    ) -> Result<EthereumTx, IndexingError>;

    /// Link an existing transaction to `block` and copy the receipt fields.
    async fn update_transaction_block_and_receipt(
        &self,
        tx_hash: &str,
        block: &EthereumBlock,
        receipt: &TransactionReceipt,
    ) -> Result<EthereumTx, IndexingError>;

    /// Start an atomic unit of work over the derived tables.
    async fn begin_derived(&self) -> Result<Box<dyn DerivedStateTx>, IndexingError>;

    /// Store internal transactions and decoder markers, skipping rows whose
    /// key already exists. Returns the number of internal txs inserted.
    async fn insert_internal_txs(
        &self,
        txs: &[InternalTx],
        decoded: &[InternalTxDecoded],
    ) -> Result<usize, IndexingError>;

    /// Master copy (singleton) addresses tracked by the trace indexer.
    async fn list_master_copies(&self) -> Result<Vec<String>, IndexingError>;

    /// Safe contract addresses tracked by the events indexer.
    async fn list_safe_contracts(&self) -> Result<Vec<String>, IndexingError>;
}

/// A single transaction over the derived tables.
///
/// Dropping the unit without calling [`commit`](DerivedStateTx::commit)
/// discards every change made through it.
#[async_trait]
pub trait DerivedStateTx: Send {
    /// Delete confirmations without an off-chain signature.
    async fn delete_onchain_confirmations(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError>;

    /// Delete multisig transactions linked to an on-chain transaction.
    async fn delete_indexed_multisig_txs(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError>;

    async fn delete_module_txs(&mut self, scope: &AddressScope) -> Result<u64, IndexingError>;

    async fn delete_safe_statuses(&mut self, scope: &AddressScope) -> Result<u64, IndexingError>;

    /// Reset `processed` on decoder markers whose internal tx originates in scope.
    async fn mark_internal_txs_unprocessed(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexingError>;

    async fn rollback(self: Box<Self>) -> Result<(), IndexingError>;
}

/// Writes and reads of decoder output and tracked contracts.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    async fn add_master_copy(&self, address: &str) -> Result<(), IndexingError>;

    async fn add_safe_contract(&self, address: &str) -> Result<(), IndexingError>;

    async fn insert_multisig_transaction(
        &self,
        tx: &MultisigTransaction,
    ) -> Result<(), IndexingError>;

    async fn insert_multisig_confirmation(
        &self,
        confirmation: &MultisigConfirmation,
    ) -> Result<(), IndexingError>;

    async fn insert_module_transaction(&self, tx: &ModuleTransaction) -> Result<(), IndexingError>;

    async fn insert_safe_status(&self, status: &SafeStatus) -> Result<(), IndexingError>;

    /// Markers still waiting for the decoder.
    async fn pending_decoded_txs(&self) -> Result<Vec<InternalTxDecoded>, IndexingError>;

    /// Mark a marker as handled by the decoder.
    async fn set_decoded_processed(
        &self,
        key: &crate::derived::InternalTxKey,
    ) -> Result<(), IndexingError>;

    async fn derived_counts(&self) -> Result<DerivedCounts, IndexingError>;
}

/// Row counts per table, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DerivedCounts {
    pub blocks: u64,
    pub transactions: u64,
    pub internal_txs: u64,
    pub decoded_pending: u64,
    pub decoded_processed: u64,
    pub multisig_txs: u64,
    pub confirmations: u64,
    pub module_txs: u64,
    pub safe_statuses: u64,
}
