//! The pluggable element indexer contract used by the reindex loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexingError;
use crate::types::{RawLog, RawTrace};

/// One unit of chain data an indexer can process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Element {
    /// A call frame from the tracing API.
    Trace(RawTrace),
    /// An event log.
    Log(RawLog),
}

impl Element {
    pub fn tx_hash(&self) -> &str {
        match self {
            Self::Trace(t) => &t.tx_hash,
            Self::Log(l) => &l.tx_hash,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Trace(t) => t.block_number,
            Self::Log(l) => l.block_number,
        }
    }
}

/// An indexer that can scan a block range for relevant elements and process them.
///
/// Two implementations exist: an event-log indexer for L2 networks and an
/// internal-transaction trace indexer for everything else.
#[async_trait]
pub trait ElementIndexer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Elements concerning `addresses` in the half-open range `[from_block, to_block)`.
    async fn find_relevant_elements(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Element>, IndexingError>;

    /// Persist the elements. Returns how many were stored.
    ///
    /// Must be idempotent: the same elements may be processed more than once
    /// (overlapping reindex runs, live indexer racing a reindex).
    async fn process_elements(&self, elements: &[Element]) -> Result<usize, IndexingError>;

    /// Addresses the indexer follows by default.
    async fn list_tracked_addresses(&self) -> Result<Vec<String>, IndexingError>;

    /// When `true`, scan exactly the given addresses and do not widen the
    /// query with the indexer's own default filter.
    fn set_exact_address_mode(&mut self, exact: bool);

    fn exact_address_mode(&self) -> bool;
}
