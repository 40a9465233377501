//! Derived entities: records computed from stored transactions and traces
//! by the decoder, plus the address scope used to invalidate them.
//!
//! Every type here can be deleted (or reset) in bulk and will be regenerated
//! from the same source data on the next decoder pass.

use serde::{Deserialize, Serialize};

// ─── AddressScope ─────────────────────────────────────────────────────────────

/// Which addresses an operation touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressScope {
    /// Every address known to the system.
    All,
    /// Only these addresses (stored lowercase).
    Only(Vec<String>),
}

impl AddressScope {
    /// Scope to the given addresses. Comparison is case-insensitive.
    pub fn only<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = addresses
            .into_iter()
            .map(|a| a.as_ref().to_ascii_lowercase())
            .collect();
        out.sort();
        out.dedup();
        Self::Only(out)
    }

    /// Returns `true` if `address` falls inside the scope.
    pub fn contains(&self, address: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(list) => list.iter().any(|a| a.eq_ignore_ascii_case(address)),
        }
    }

    /// The explicit address list, or `None` for the global scope.
    pub fn addresses(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::Only(list) => Some(list),
        }
    }
}

impl std::fmt::Display for AddressScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all addresses"),
            Self::Only(list) => write!(f, "{} address(es)", list.len()),
        }
    }
}

// ─── Internal transactions ───────────────────────────────────────────────────

/// Natural key of an internal transaction: the owning tx plus its position
/// in the call tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InternalTxKey {
    pub tx_hash: String,
    pub trace_address: String,
}

impl InternalTxKey {
    pub fn new(tx_hash: impl Into<String>, trace_address: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            trace_address: trace_address.into(),
        }
    }
}

/// A stored trace (or a pseudo-trace built from an event log on L2 networks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTx {
    pub key: InternalTxKey,
    pub block_number: u64,
    /// Originating address of the call frame.
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub call_type: Option<String>,
    pub data: String,
}

/// Marker telling the decoder that an internal transaction carries a call it
/// understands. `processed == false` means "decode me".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTxDecoded {
    pub key: InternalTxKey,
    /// 4-byte selector (traces) or `topic0` (events) that triggered the marker.
    pub selector: String,
    pub processed: bool,
}

// ─── Multisig entities ───────────────────────────────────────────────────────

/// A multisig transaction, proposed off-chain and/or indexed from chain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigTransaction {
    pub safe_tx_hash: String,
    pub safe: String,
    /// On-chain execution; `None` for proposals that were never executed.
    pub ethereum_tx: Option<String>,
    pub nonce: u64,
}

/// An owner's confirmation of a multisig transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigConfirmation {
    pub multisig_transaction_hash: String,
    pub owner: String,
    pub ethereum_tx: Option<String>,
    /// Off-chain signature; `None` for confirmations derived from chain data.
    pub signature: Option<String>,
}

impl MultisigConfirmation {
    /// Returns `true` if the confirmation only exists because it was decoded from chain data.
    pub fn is_onchain(&self) -> bool {
        self.signature.is_none()
    }
}

/// A transaction executed through a Safe module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleTransaction {
    pub internal_tx: InternalTxKey,
    pub safe: String,
    pub module: String,
    pub to: String,
    pub value: String,
    pub data: String,
}

/// Snapshot of a Safe's configuration after an internal transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeStatus {
    pub internal_tx: InternalTxKey,
    pub address: String,
    pub nonce: u64,
    pub owners: Vec<String>,
    pub threshold: u32,
    pub master_copy: String,
}

// ─── ReprocessSummary ────────────────────────────────────────────────────────

/// Row counts touched by one invalidation transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReprocessSummary {
    pub confirmations_deleted: u64,
    pub multisig_txs_deleted: u64,
    pub module_txs_deleted: u64,
    pub safe_statuses_deleted: u64,
    pub internal_txs_marked: u64,
}

impl ReprocessSummary {
    /// Returns `true` if nothing was deleted or updated.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
