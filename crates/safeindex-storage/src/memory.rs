//! In-memory storage backend.
//!
//! Holds blocks, transactions, indexer output and derived entities in RAM.
//! Useful for tests and short-lived jobs that don't need persistence.
//!
//! A single async mutex guards all tables. A derived-state unit of work holds
//! the lock for its whole lifetime and edits a staged copy of the derived
//! tables, which replaces the live copy on commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use safeindex_core::derived::{
    AddressScope, InternalTx, InternalTxDecoded, InternalTxKey, ModuleTransaction,
    MultisigConfirmation, MultisigTransaction, SafeStatus,
};
use safeindex_core::error::IndexingError;
use safeindex_core::store::{DerivedCounts, DerivedStateTx, DerivedStore, IndexStore};
use safeindex_core::types::{EthereumBlock, EthereumTx, RawBlock, RawTransaction, TransactionReceipt};

#[derive(Debug, Clone, Default)]
struct DerivedTables {
    internal_txs: BTreeMap<InternalTxKey, InternalTx>,
    decoded: BTreeMap<InternalTxKey, InternalTxDecoded>,
    multisig_txs: BTreeMap<String, MultisigTransaction>,
    /// Keyed by `(multisig_transaction_hash, owner)`.
    confirmations: BTreeMap<(String, String), MultisigConfirmation>,
    module_txs: BTreeMap<InternalTxKey, ModuleTransaction>,
    safe_statuses: BTreeMap<InternalTxKey, SafeStatus>,
}

#[derive(Debug, Default)]
struct Tables {
    blocks: HashMap<String, EthereumBlock>,
    txs: HashMap<String, EthereumTx>,
    master_copies: BTreeSet<String>,
    safe_contracts: BTreeSet<String>,
    derived: DerivedTables,
}

/// In-memory index store.
///
/// All data is lost when the last clone is dropped. Cloning is cheap and
/// shares the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn get_block(&self, block_hash: &str) -> Result<Option<EthereumBlock>, IndexingError> {
        Ok(self.tables.lock().await.blocks.get(block_hash).cloned())
    }

    async fn get_or_create_block(
        &self,
        block: &RawBlock,
        confirmed: bool,
    ) -> Result<EthereumBlock, IndexingError> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .blocks
            .entry(block.hash.clone())
            .or_insert_with(|| EthereumBlock::from_raw(block, confirmed));
        if confirmed && !row.confirmed {
            row.confirmed = true;
        }
        Ok(row.clone())
    }

    async fn confirm_blocks(&self, up_to_number: u64) -> Result<u64, IndexingError> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for block in tables.blocks.values_mut() {
            if !block.confirmed && block.number <= up_to_number {
                block.confirmed = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<EthereumTx>, IndexingError> {
        Ok(self.tables.lock().await.txs.get(tx_hash).cloned())
    }

    async fn get_mined_transactions(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<EthereumTx>, IndexingError> {
        let tables = self.tables.lock().await;
        Ok(tx_hashes
            .iter()
            .filter_map(|h| tables.txs.get(h))
            .filter(|tx| tx.is_mined())
            .cloned()
            .collect())
    }

    async fn create_transaction(
        &self,
        tx: &RawTransaction,
        receipt: &TransactionReceipt,
        block: &EthereumBlock,
    ) -> Result<EthereumTx, IndexingError> {
        let mut tables = self.tables.lock().await;
        if tables.txs.contains_key(&tx.hash) {
            return Err(IndexingError::DuplicateTransaction {
                tx_hash: tx.hash.clone(),
            });
        }
        let row = EthereumTx::from_parts(tx, receipt, block);
        tables.txs.insert(tx.hash.clone(), row.clone());
        debug!(tx_hash = %tx.hash, block = block.number, "transaction stored");
        Ok(row)
    }

    async fn create_pending_transaction(
        &self,
        tx: &RawTransaction,
    ) -> Result<EthereumTx, IndexingError> {
        let mut tables = self.tables.lock().await;
        if tables.txs.contains_key(&tx.hash) {
            return Err(IndexingError::DuplicateTransaction {
                tx_hash: tx.hash.clone(),
            });
        }
        let row = EthereumTx::pending(tx);
        tables.txs.insert(tx.hash.clone(), row.clone());
        Ok(row)
    }

    async fn update_transaction_block_and_receipt(
        &self,
        tx_hash: &str,
        block: &EthereumBlock,
        receipt: &TransactionReceipt,
    ) -> Result<EthereumTx, IndexingError> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .txs
            .get_mut(tx_hash)
            .ok_or_else(|| IndexingError::TransactionNotFound {
                tx_hash: tx_hash.to_string(),
            })?;
        row.apply_block_and_receipt(block, receipt);
        Ok(row.clone())
    }

    async fn begin_derived(&self) -> Result<Box<dyn DerivedStateTx>, IndexingError> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.derived.clone();
        Ok(Box::new(MemoryDerivedTx { guard, staged }))
    }

    async fn insert_internal_txs(
        &self,
        txs: &[InternalTx],
        decoded: &[InternalTxDecoded],
    ) -> Result<usize, IndexingError> {
        let mut tables = self.tables.lock().await;
        let derived = &mut tables.derived;
        let mut inserted = 0;
        for tx in txs {
            if !derived.internal_txs.contains_key(&tx.key) {
                derived.internal_txs.insert(tx.key.clone(), tx.clone());
                inserted += 1;
            }
        }
        for marker in decoded {
            derived
                .decoded
                .entry(marker.key.clone())
                .or_insert_with(|| marker.clone());
        }
        Ok(inserted)
    }

    async fn list_master_copies(&self) -> Result<Vec<String>, IndexingError> {
        Ok(self.tables.lock().await.master_copies.iter().cloned().collect())
    }

    async fn list_safe_contracts(&self) -> Result<Vec<String>, IndexingError> {
        Ok(self.tables.lock().await.safe_contracts.iter().cloned().collect())
    }
}

#[async_trait]
impl DerivedStore for InMemoryStore {
    async fn add_master_copy(&self, address: &str) -> Result<(), IndexingError> {
        self.tables.lock().await.master_copies.insert(address.to_string());
        Ok(())
    }

    async fn add_safe_contract(&self, address: &str) -> Result<(), IndexingError> {
        self.tables.lock().await.safe_contracts.insert(address.to_string());
        Ok(())
    }

    async fn insert_multisig_transaction(
        &self,
        tx: &MultisigTransaction,
    ) -> Result<(), IndexingError> {
        self.tables
            .lock()
            .await
            .derived
            .multisig_txs
            .insert(tx.safe_tx_hash.clone(), tx.clone());
        Ok(())
    }

    async fn insert_multisig_confirmation(
        &self,
        confirmation: &MultisigConfirmation,
    ) -> Result<(), IndexingError> {
        let key = (
            confirmation.multisig_transaction_hash.clone(),
            confirmation.owner.clone(),
        );
        self.tables
            .lock()
            .await
            .derived
            .confirmations
            .insert(key, confirmation.clone());
        Ok(())
    }

    async fn insert_module_transaction(&self, tx: &ModuleTransaction) -> Result<(), IndexingError> {
        self.tables
            .lock()
            .await
            .derived
            .module_txs
            .insert(tx.internal_tx.clone(), tx.clone());
        Ok(())
    }

    async fn insert_safe_status(&self, status: &SafeStatus) -> Result<(), IndexingError> {
        self.tables
            .lock()
            .await
            .derived
            .safe_statuses
            .insert(status.internal_tx.clone(), status.clone());
        Ok(())
    }

    async fn pending_decoded_txs(&self) -> Result<Vec<InternalTxDecoded>, IndexingError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .derived
            .decoded
            .values()
            .filter(|d| !d.processed)
            .cloned()
            .collect())
    }

    async fn set_decoded_processed(&self, key: &InternalTxKey) -> Result<(), IndexingError> {
        if let Some(marker) = self.tables.lock().await.derived.decoded.get_mut(key) {
            marker.processed = true;
        }
        Ok(())
    }

    async fn derived_counts(&self) -> Result<DerivedCounts, IndexingError> {
        let tables = self.tables.lock().await;
        let d = &tables.derived;
        let processed = d.decoded.values().filter(|m| m.processed).count() as u64;
        Ok(DerivedCounts {
            blocks: tables.blocks.len() as u64,
            transactions: tables.txs.len() as u64,
            internal_txs: d.internal_txs.len() as u64,
            decoded_pending: d.decoded.len() as u64 - processed,
            decoded_processed: processed,
            multisig_txs: d.multisig_txs.len() as u64,
            confirmations: d.confirmations.len() as u64,
            module_txs: d.module_txs.len() as u64,
            safe_statuses: d.safe_statuses.len() as u64,
        })
    }
}

// ─── Derived-state unit of work ──────────────────────────────────────────────

struct MemoryDerivedTx {
    guard: OwnedMutexGuard<Tables>,
    staged: DerivedTables,
}

fn retain_counting<K: Ord, V>(map: &mut BTreeMap<K, V>, mut keep: impl FnMut(&V) -> bool) -> u64 {
    let before = map.len();
    map.retain(|_, v| keep(v));
    (before - map.len()) as u64
}

#[async_trait]
impl DerivedStateTx for MemoryDerivedTx {
    async fn delete_onchain_confirmations(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        let multisig_txs = &self.staged.multisig_txs;
        let in_scope = |c: &MultisigConfirmation| match scope {
            AddressScope::All => true,
            AddressScope::Only(_) => multisig_txs
                .get(&c.multisig_transaction_hash)
                .is_some_and(|m| scope.contains(&m.safe)),
        };
        let doomed: Vec<_> = self
            .staged
            .confirmations
            .iter()
            .filter(|(_, c)| c.is_onchain() && in_scope(c))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.staged.confirmations.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_indexed_multisig_txs(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        Ok(retain_counting(&mut self.staged.multisig_txs, |m| {
            m.ethereum_tx.is_none() || !scope.contains(&m.safe)
        }))
    }

    async fn delete_module_txs(&mut self, scope: &AddressScope) -> Result<u64, IndexingError> {
        Ok(retain_counting(&mut self.staged.module_txs, |m| {
            !scope.contains(&m.safe)
        }))
    }

    async fn delete_safe_statuses(&mut self, scope: &AddressScope) -> Result<u64, IndexingError> {
        Ok(retain_counting(&mut self.staged.safe_statuses, |s| {
            !scope.contains(&s.address)
        }))
    }

    async fn mark_internal_txs_unprocessed(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        let internal_txs = &self.staged.internal_txs;
        let mut marked = 0;
        for (key, marker) in self.staged.decoded.iter_mut() {
            let from_in_scope = internal_txs
                .get(key)
                .is_some_and(|itx| scope.contains(&itx.from));
            if matches!(scope, AddressScope::All) || from_in_scope {
                marker.processed = false;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexingError> {
        let MemoryDerivedTx { mut guard, staged } = *self;
        guard.derived = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexingError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_block(number: u64, hash: &str) -> RawBlock {
        RawBlock {
            number,
            hash: hash.into(),
            parent_hash: "0x0".into(),
            timestamp: (number * 12) as i64,
        }
    }

    fn raw_tx(hash: &str) -> RawTransaction {
        RawTransaction {
            hash: hash.into(),
            block_hash: None,
            block_number: None,
            transaction_index: None,
            from: "0xfrom".into(),
            to: Some("0xto".into()),
            value: "0".into(),
            gas: 21_000,
            gas_price: None,
            nonce: 0,
            input: "0x".into(),
        }
    }

    fn receipt(hash: &str, block: &EthereumBlock) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash.into(),
            block_hash: Some(block.block_hash.clone()),
            block_number: Some(block.number),
            gas_used: 21_000,
            effective_gas_price: None,
            status: Some(1),
            logs: vec![],
        }
    }

    fn key(n: u32) -> InternalTxKey {
        InternalTxKey::new(format!("0xt{n}"), "")
    }

    #[tokio::test]
    async fn block_get_or_create_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.get_or_create_block(&raw_block(1, "0xb1"), false).await.unwrap();
        let b = store.get_or_create_block(&raw_block(1, "0xb1"), false).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.derived_counts().await.unwrap().blocks, 1);
    }

    #[tokio::test]
    async fn block_confirmation_only_upgrades() {
        let store = InMemoryStore::new();
        store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();
        let again = store.get_or_create_block(&raw_block(1, "0xb1"), false).await.unwrap();
        assert!(again.confirmed);

        store.get_or_create_block(&raw_block(2, "0xb2"), false).await.unwrap();
        store.get_or_create_block(&raw_block(3, "0xb3"), false).await.unwrap();
        assert_eq!(store.confirm_blocks(2).await.unwrap(), 1);
        assert!(store.get_block("0xb2").await.unwrap().unwrap().confirmed);
        assert!(!store.get_block("0xb3").await.unwrap().unwrap().confirmed);
    }

    #[tokio::test]
    async fn duplicate_transaction_rejected() {
        let store = InMemoryStore::new();
        let block = store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();
        store
            .create_transaction(&raw_tx("0xt"), &receipt("0xt", &block), &block)
            .await
            .unwrap();
        let err = store
            .create_transaction(&raw_tx("0xt"), &receipt("0xt", &block), &block)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn mined_query_skips_pending() {
        let store = InMemoryStore::new();
        let block = store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();
        store.create_pending_transaction(&raw_tx("0xp")).await.unwrap();
        store
            .create_transaction(&raw_tx("0xm"), &receipt("0xm", &block), &block)
            .await
            .unwrap();

        let mined = store
            .get_mined_transactions(&["0xp".into(), "0xm".into(), "0xmissing".into()])
            .await
            .unwrap();
        assert_eq!(mined.len(), 1);
        assert_eq!(mined[0].tx_hash, "0xm");
    }

    #[tokio::test]
    async fn internal_txs_insert_is_idempotent() {
        let store = InMemoryStore::new();
        let itx = InternalTx {
            key: key(1),
            block_number: 5,
            from: "0xsafe".into(),
            to: Some("0xmaster".into()),
            value: "0".into(),
            call_type: Some("delegatecall".into()),
            data: "0x6a761202".into(),
        };
        let marker = InternalTxDecoded {
            key: key(1),
            selector: "0x6a761202".into(),
            processed: false,
        };
        assert_eq!(store.insert_internal_txs(&[itx.clone()], &[marker.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_internal_txs(&[itx], &[marker]).await.unwrap(), 0);
        assert_eq!(store.pending_decoded_txs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = InMemoryStore::new();
        store
            .insert_safe_status(&SafeStatus {
                internal_tx: key(1),
                address: "0xsafe".into(),
                nonce: 0,
                owners: vec!["0xowner".into()],
                threshold: 1,
                master_copy: "0xmaster".into(),
            })
            .await
            .unwrap();

        {
            let mut tx = store.begin_derived().await.unwrap();
            assert_eq!(tx.delete_safe_statuses(&AddressScope::All).await.unwrap(), 1);
            // dropped without commit
        }
        assert_eq!(store.derived_counts().await.unwrap().safe_statuses, 1);

        let mut tx = store.begin_derived().await.unwrap();
        tx.delete_safe_statuses(&AddressScope::All).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.derived_counts().await.unwrap().safe_statuses, 0);
    }
}
