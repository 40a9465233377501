//! The reindex loop: replays a bounded block range through an indexer.
//!
//! Runs next to the live indexer without stopping it: the two only share the
//! store, and indexers are idempotent, so elements seen by both are stored once.
//!
//! ```text
//! stop   = min(head, to_block) (or head)
//! cursor = from_block
//! while cursor < stop:
//!     find_relevant_elements(addresses, cursor, cursor + chunk)   // [cursor, cursor + chunk)
//!     process_elements(...)
//!     cursor += chunk
//! ```
//!
//! The last chunk may extend past `stop`.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use safeindex_core::client::ChainClient;
use safeindex_core::config::DEFAULT_REINDEX_CHUNK_SIZE;
use safeindex_core::error::IndexingError;
use safeindex_core::indexer::ElementIndexer;

use crate::indexers::{InternalTxIndexer, SafeEventsIndexer};
use crate::service::IndexService;

/// Parameters of one reindex run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexRequest {
    pub from_block: u64,
    /// Upper bound (exclusive). `None` = current head.
    pub to_block: Option<u64>,
    pub chunk_size: u64,
    /// Explicit addresses. `None` (or empty) = the indexer's tracked addresses.
    pub addresses: Option<Vec<String>>,
}

impl ReindexRequest {
    pub fn new(from_block: u64) -> Self {
        Self {
            from_block,
            to_block: None,
            chunk_size: DEFAULT_REINDEX_CHUNK_SIZE,
            addresses: None,
        }
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn addresses(mut self, addresses: Vec<String>) -> Self {
        self.addresses = Some(addresses);
        self
    }

    /// Reject ranges and chunk sizes that cannot make progress.
    pub fn validate(&self) -> Result<(), IndexingError> {
        if let Some(to_block) = self.to_block {
            if to_block <= self.from_block {
                return Err(IndexingError::InvalidBlockRange {
                    from_block: self.from_block,
                    to_block,
                });
            }
        }
        if self.chunk_size == 0 {
            return Err(IndexingError::InvalidChunkSize);
        }
        Ok(())
    }
}

/// Outcome of a reindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub indexer: String,
    pub addresses: usize,
    pub chunks: u64,
    pub elements_found: usize,
    pub elements_processed: usize,
    pub stop_block: u64,
}

/// Drives an [`ElementIndexer`] across a block range in fixed-size chunks.
pub struct ReindexLoop {
    client: Arc<dyn ChainClient>,
    indexer: Box<dyn ElementIndexer>,
}

impl ReindexLoop {
    pub fn new(client: Arc<dyn ChainClient>, indexer: Box<dyn ElementIndexer>) -> Self {
        Self { client, indexer }
    }

    pub fn indexer(&self) -> &dyn ElementIndexer {
        self.indexer.as_ref()
    }

    /// Run until the cursor reaches the stop block.
    pub async fn run(&mut self, request: &ReindexRequest) -> Result<ReindexReport, IndexingError> {
        request.validate()?;

        let name = self.indexer.name().to_string();
        let addresses = match &request.addresses {
            Some(list) if !list.is_empty() => {
                self.indexer.set_exact_address_mode(true);
                list.clone()
            }
            _ => {
                self.indexer.set_exact_address_mode(false);
                self.indexer.list_tracked_addresses().await?
            }
        };

        let mut report = ReindexReport {
            indexer: name.clone(),
            addresses: addresses.len(),
            ..Default::default()
        };

        if addresses.is_empty() {
            warn!(indexer = %name, "no addresses to reindex");
            return Ok(report);
        }

        let head = self.client.current_block_number().await?;
        let stop = request.to_block.map_or(head, |to| to.min(head));
        report.stop_block = stop;

        info!(
            indexer = %name,
            addresses = addresses.len(),
            from = request.from_block,
            stop,
            chunk = request.chunk_size,
            exact = self.indexer.exact_address_mode(),
            "Starting reindex"
        );

        let mut cursor = request.from_block;
        while cursor < stop {
            let chunk_end = cursor.saturating_add(request.chunk_size);

            let elements = self
                .indexer
                .find_relevant_elements(&addresses, cursor, chunk_end)
                .await?;
            let processed = self.indexer.process_elements(&elements).await?;

            report.chunks += 1;
            report.elements_found += elements.len();
            report.elements_processed += processed;

            info!(
                current = chunk_end,
                stop,
                found = elements.len(),
                processed,
                "Reindex chunk complete"
            );

            cursor = chunk_end;
        }

        info!(
            indexer = %name,
            chunks = report.chunks,
            found = report.elements_found,
            processed = report.elements_processed,
            "Reindex complete"
        );
        Ok(report)
    }
}

impl IndexService {
    /// The indexer matching the configured network mode: Safe events on L2,
    /// internal transaction traces otherwise.
    pub fn indexer_for_network(self: &Arc<Self>) -> Box<dyn ElementIndexer> {
        if self.network_mode().is_l2() {
            Box::new(SafeEventsIndexer::new(Arc::clone(self)))
        } else {
            Box::new(InternalTxIndexer::new(Arc::clone(self)))
        }
    }

    /// Reindex master copies (or Safes, on L2) over `[from_block, to_block)`
    /// while the live indexer keeps running.
    ///
    /// `chunk_size` defaults to the configured reindex chunk size; `addresses`
    /// defaults to every address the indexer tracks.
    pub async fn reindex_master_copies(
        self: &Arc<Self>,
        from_block: u64,
        to_block: Option<u64>,
        chunk_size: Option<u64>,
        addresses: Option<Vec<String>>,
    ) -> Result<ReindexReport, IndexingError> {
        let request = ReindexRequest {
            from_block,
            to_block,
            chunk_size: chunk_size.unwrap_or(self.reindex_chunk_size()),
            addresses,
        };
        // Reject bad input before touching the node.
        request.validate()?;

        let mut reindex = ReindexLoop::new(Arc::clone(self.client()), self.indexer_for_network());
        reindex.run(&request).await
    }
}
