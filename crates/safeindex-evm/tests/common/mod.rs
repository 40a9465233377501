//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use safeindex_core::client::ChainClient;
use safeindex_core::config::NetworkMode;
use safeindex_core::confirmation::ConfirmationPolicy;
use safeindex_core::error::IndexingError;
use safeindex_core::types::{RawBlock, RawLog, RawTrace, RawTransaction, TransactionReceipt};
use safeindex_evm::IndexService;
use safeindex_storage::InMemoryStore;

pub const REORG_DEPTH: u64 = 10;

#[derive(Default)]
struct MockState {
    head: u64,
    blocks: HashMap<String, RawBlock>,
    txs: HashMap<String, RawTransaction>,
    receipts: HashMap<String, TransactionReceipt>,
    traces: Vec<RawTrace>,
    logs: Vec<RawLog>,
    /// Remaining `None` answers before a receipt is served.
    receipt_misses: HashMap<String, usize>,
    block_misses: HashMap<String, usize>,
    calls: Vec<String>,
}

/// Scripted chain node. Every trait call is recorded.
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new(head: u64) -> Arc<Self> {
        let mock = Self::default();
        mock.state.lock().unwrap().head = head;
        Arc::new(mock)
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn add_block(&self, number: u64) -> RawBlock {
        let block = RawBlock {
            number,
            hash: block_hash(number),
            parent_hash: block_hash(number.saturating_sub(1)),
            timestamp: 1_600_000_000 + number as i64 * 12,
        };
        self.state
            .lock()
            .unwrap()
            .blocks
            .insert(block.hash.clone(), block.clone());
        block
    }

    /// A mined transaction with its receipt, in block `number`.
    pub fn add_mined_tx(&self, tx_hash: &str, number: u64) {
        let block = self.add_block(number);
        let mut state = self.state.lock().unwrap();
        let mut tx = raw_tx(tx_hash);
        tx.block_hash = Some(block.hash.clone());
        tx.block_number = Some(number);
        state.txs.insert(tx_hash.into(), tx);
        state.receipts.insert(
            tx_hash.into(),
            TransactionReceipt {
                transaction_hash: tx_hash.into(),
                block_hash: Some(block.hash),
                block_number: Some(number),
                gas_used: 42_000,
                effective_gas_price: Some("2000000000".into()),
                status: Some(1),
                logs: vec![],
            },
        );
    }

    /// A transaction the node knows but has not mined yet.
    pub fn add_pending_tx(&self, tx_hash: &str) {
        let mut state = self.state.lock().unwrap();
        state.txs.insert(tx_hash.into(), raw_tx(tx_hash));
        state.receipts.insert(
            tx_hash.into(),
            TransactionReceipt {
                transaction_hash: tx_hash.into(),
                block_hash: None,
                block_number: None,
                gas_used: 0,
                effective_gas_price: None,
                status: None,
                logs: vec![],
            },
        );
    }

    pub fn miss_receipt(&self, tx_hash: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .receipt_misses
            .insert(tx_hash.into(), times);
    }

    pub fn miss_block(&self, block_hash: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .block_misses
            .insert(block_hash.into(), times);
    }

    pub fn add_trace(&self, trace: RawTrace) {
        self.state.lock().unwrap().traces.push(trace);
    }

    pub fn add_log(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls whose name starts with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(state: &mut MockState, call: impl Into<String>) {
        state.calls.push(call.into());
    }

    fn serve_receipt(state: &mut MockState, tx_hash: &str) -> Option<TransactionReceipt> {
        if let Some(misses) = state.receipt_misses.get_mut(tx_hash) {
            if *misses > 0 {
                *misses -= 1;
                return None;
            }
        }
        state.receipts.get(tx_hash).cloned()
    }

    fn serve_block(state: &mut MockState, block_hash: &str) -> Option<RawBlock> {
        if let Some(misses) = state.block_misses.get_mut(block_hash) {
            if *misses > 0 {
                *misses -= 1;
                return None;
            }
        }
        state.blocks.get(block_hash).cloned()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn current_block_number(&self) -> Result<u64, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "current_block_number");
        Ok(state.head)
    }

    async fn get_block(&self, block_hash: &str) -> Result<Option<RawBlock>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_block");
        Ok(Self::serve_block(&mut state, block_hash))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<RawTransaction>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_transaction");
        Ok(state.txs.get(tx_hash).cloned())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_transaction_receipt");
        Ok(Self::serve_receipt(&mut state, tx_hash))
    }

    async fn get_logs(
        &self,
        addresses: &[String],
        topic0s: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(
            &mut state,
            format!("get_logs:{from_block}-{to_block}:{}", addresses.len()),
        );
        Ok(state
            .logs
            .iter()
            .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
            .filter(|l| {
                addresses.is_empty() || addresses.iter().any(|a| a.eq_ignore_ascii_case(&l.address))
            })
            .filter(|l| {
                topic0s.is_empty() || l.topic0().is_some_and(|t| topic0s.iter().any(|x| x == t))
            })
            .cloned()
            .collect())
    }

    async fn trace_filter(
        &self,
        to_addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawTrace>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, format!("trace_filter:{from_block}-{to_block}"));
        Ok(state
            .traces
            .iter()
            .filter(|t| t.block_number >= from_block && t.block_number <= to_block)
            .filter(|t| {
                t.to.as_deref()
                    .is_some_and(|to| to_addresses.iter().any(|a| a.eq_ignore_ascii_case(to)))
            })
            .cloned()
            .collect())
    }

    async fn get_blocks(
        &self,
        block_hashes: &[String],
    ) -> Result<Vec<Option<RawBlock>>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_blocks");
        Ok(block_hashes
            .iter()
            .map(|h| Self::serve_block(&mut state, h))
            .collect())
    }

    async fn get_transactions(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Option<RawTransaction>>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_transactions");
        Ok(tx_hashes.iter().map(|h| state.txs.get(h).cloned()).collect())
    }

    async fn get_transaction_receipts(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Option<TransactionReceipt>>, IndexingError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_transaction_receipts");
        Ok(tx_hashes
            .iter()
            .map(|h| Self::serve_receipt(&mut state, h))
            .collect())
    }
}

pub fn block_hash(number: u64) -> String {
    format!("0xb{number:04}")
}

pub fn raw_tx(tx_hash: &str) -> RawTransaction {
    RawTransaction {
        hash: tx_hash.into(),
        block_hash: None,
        block_number: None,
        transaction_index: Some(0),
        from: "0x5afe000000000000000000000000000000000001".into(),
        to: Some("0x5afe000000000000000000000000000000000002".into()),
        value: "0".into(),
        gas: 210_000,
        gas_price: Some("1000000000".into()),
        nonce: 1,
        input: "0x6a761202".into(),
    }
}

pub fn hashes(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A service over `mock` and a fresh in-memory store.
pub fn service_with(
    mock: &Arc<MockChainClient>,
    mode: NetworkMode,
) -> (Arc<IndexService>, InMemoryStore) {
    let store = InMemoryStore::new();
    let service = IndexService::new(
        mock.clone(),
        Arc::new(store.clone()),
        ConfirmationPolicy::new(REORG_DEPTH),
        mode,
        100,
    );
    (Arc::new(service), store)
}

pub fn service(mock: &Arc<MockChainClient>) -> (Arc<IndexService>, InMemoryStore) {
    service_with(mock, NetworkMode::L1)
}
