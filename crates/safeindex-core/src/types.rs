//! Chain-facing and stored types for blocks and transactions.

use serde::{Deserialize, Serialize};

// ─── Raw chain data ───────────────────────────────────────────────────────────

/// A block as returned by the node: enough to persist an [`EthereumBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

/// A transaction as returned by `eth_getTransactionByHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    /// `None` while the transaction is pending.
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u32>,
    pub from: String,
    /// `None` for contract creations.
    pub to: Option<String>,
    /// Value in wei, decimal string.
    pub value: String,
    pub gas: u64,
    /// Gas price in wei, decimal string.
    pub gas_price: Option<String>,
    pub nonce: u64,
    /// Calldata (`0x…`).
    pub input: String,
}

/// A raw EVM log, as found in receipts and `eth_getLogs` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u32,
    /// `true` if the log was removed by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// The event signature hash (`topics[0]`), if any.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// A transaction receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    /// `None` while the transaction is pending.
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: Option<String>,
    /// `1` success, `0` failure. Pre-Byzantium receipts have no status.
    pub status: Option<u64>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

impl TransactionReceipt {
    /// Returns `true` if the receipt references a block.
    pub fn is_mined(&self) -> bool {
        self.block_hash.is_some() && self.block_number.is_some()
    }
}

/// A single call frame from `trace_filter` / `trace_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrace {
    pub tx_hash: String,
    pub block_number: u64,
    /// Position of the frame in the call tree (`"0,1,2"`; empty for the root).
    pub trace_address: String,
    /// `call`, `delegatecall`, `staticcall`, `create`, ...
    pub call_type: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub input: String,
    pub error: Option<String>,
}

// ─── Stored records ───────────────────────────────────────────────────────────

/// A persisted block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumBlock {
    pub number: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    /// Enough blocks have been built on top to treat this one as final.
    pub confirmed: bool,
}

impl EthereumBlock {
    pub fn from_raw(block: &RawBlock, confirmed: bool) -> Self {
        Self {
            number: block.number,
            block_hash: block.hash.clone(),
            parent_hash: block.parent_hash.clone(),
            timestamp: block.timestamp,
            confirmed,
        }
    }
}

/// A persisted transaction.
///
/// Created either already mined (with block and receipt fields) or pending
/// (no block). A pending row is updated in place once the receipt is
/// available; the block link is never cleared afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumTx {
    pub tx_hash: String,
    /// Owning block hash; `None` while pending.
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u32>,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas: u64,
    pub gas_price: Option<String>,
    pub nonce: u64,
    pub data: String,
    pub gas_used: Option<u64>,
    pub status: Option<u64>,
    pub logs: Vec<RawLog>,
}

impl EthereumTx {
    /// Build a mined transaction row from node data.
    pub fn from_parts(tx: &RawTransaction, receipt: &TransactionReceipt, block: &EthereumBlock) -> Self {
        let mut row = Self::pending(tx);
        row.apply_block_and_receipt(block, receipt);
        row
    }

    /// Build a row for a transaction observed before being mined.
    pub fn pending(tx: &RawTransaction) -> Self {
        Self {
            tx_hash: tx.hash.clone(),
            block_hash: None,
            block_number: None,
            transaction_index: tx.transaction_index,
            from: tx.from.clone(),
            to: tx.to.clone(),
            value: tx.value.clone(),
            gas: tx.gas,
            gas_price: tx.gas_price.clone(),
            nonce: tx.nonce,
            data: tx.input.clone(),
            gas_used: None,
            status: None,
            logs: vec![],
        }
    }

    /// Returns `true` once the transaction is linked to a block.
    pub fn is_mined(&self) -> bool {
        self.block_hash.is_some()
    }

    /// Link the transaction to `block` and copy the receipt fields.
    pub fn apply_block_and_receipt(&mut self, block: &EthereumBlock, receipt: &TransactionReceipt) {
        self.block_hash = Some(block.block_hash.clone());
        self.block_number = Some(block.number);
        self.gas_used = Some(receipt.gas_used);
        self.status = receipt.status;
        self.logs = receipt.logs.clone();
        if let Some(price) = &receipt.effective_gas_price {
            self.gas_price = Some(price.clone());
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
