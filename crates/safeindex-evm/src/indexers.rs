//! Element indexers.
//!
//! - [`InternalTxIndexer`]: scans `trace_filter` for calls into master
//!   copies (networks with a tracing API).
//! - [`SafeEventsIndexer`]: scans `eth_getLogs` for Safe events (L2
//!   networks, where the contracts emit an event per state change).
//!
//! Both persist the owning transactions through the reconciliation engine,
//! then store the elements as internal transactions plus decoder markers.
//! Re-processing the same elements is a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use safeindex_core::derived::{InternalTx, InternalTxDecoded, InternalTxKey};
use safeindex_core::error::IndexingError;
use safeindex_core::indexer::{Element, ElementIndexer};
use safeindex_core::types::{RawLog, RawTrace};

use crate::service::IndexService;

/// `topic0` of the Safe events worth decoding.
pub const SAFE_EVENT_TOPICS: &[&str] = &[
    // SafeMultiSigTransaction
    "0x66753cd2356569ee081232e3be8909b950e0a76c1f8460c3a5e3c2be32b11bed",
    // SafeModuleTransaction
    "0xb648d3644f584ed1c2232d53c46d87e693586486ad0d1175f8656013110b714e",
    // SafeSetup
    "0x141df868a6331af528e38c83b7aa03edc19be66e37ae67f9285bf4f8e3c6a1a8",
    // ExecutionSuccess
    "0x442e715f626346e8c54381002da614f62bee8d27386535b2521ec8540898556e",
    // ExecutionFailure
    "0x23428b18acfb3ea64b08dc0c1d296ea9c09702c09083ca5272e64d115b687d23",
    // AddedOwner
    "0x9465fa0c962cc76958e6373a993326400c1c94f8be2fe3a952adfa7f60b2ea26",
    // RemovedOwner
    "0xf8d49fc529812e9a7c5c50e69c20f0dccc0db8fa95c98bc58cc9a4f1c1299eaf",
    // ChangedThreshold
    "0x610f7ff2b304ae8903c3de74c60c6ab1f7d6226b3f52c5161905bb5ad4039c93",
];

/// Length of a `0x`-prefixed 4-byte selector.
const SELECTOR_LEN: usize = 10;

/// Convert a half-open `[from, to)` range into the inclusive bounds node
/// filters expect. `None` when the range is empty.
fn inclusive_bounds(from_block: u64, to_block: u64) -> Option<(u64, u64)> {
    (to_block > from_block).then(|| (from_block, to_block - 1))
}

/// Resolve the owning transactions, then store rows and markers.
async fn store_elements(
    service: &IndexService,
    rows: Vec<InternalTx>,
    markers: Vec<InternalTxDecoded>,
) -> Result<usize, IndexingError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let tx_hashes: Vec<String> = rows.iter().map(|r| r.key.tx_hash.clone()).collect();
    service.get_or_fetch_transactions_batch(&tx_hashes).await?;
    service.store().insert_internal_txs(&rows, &markers).await
}

// ─── InternalTxIndexer ───────────────────────────────────────────────────────

/// Trace-based indexer for master copy calls.
///
/// `trace_filter` is always scoped by destination, so the scan is exact in
/// either address mode.
pub struct InternalTxIndexer {
    service: Arc<IndexService>,
}

impl InternalTxIndexer {
    pub fn new(service: Arc<IndexService>) -> Self {
        Self { service }
    }

    fn to_rows(traces: &[&RawTrace]) -> (Vec<InternalTx>, Vec<InternalTxDecoded>) {
        let mut rows = Vec::with_capacity(traces.len());
        let mut markers = Vec::new();
        for trace in traces {
            let key = InternalTxKey::new(trace.tx_hash.as_str(), trace.trace_address.as_str());
            let is_delegate = trace.call_type.as_deref() == Some("delegatecall");
            if let Some(selector) = trace.input.get(..SELECTOR_LEN) {
                if is_delegate && trace.error.is_none() {
                    markers.push(InternalTxDecoded {
                        key: key.clone(),
                        selector: selector.to_ascii_lowercase(),
                        processed: false,
                    });
                }
            }
            rows.push(InternalTx {
                key,
                block_number: trace.block_number,
                from: trace.from.clone(),
                to: trace.to.clone(),
                value: trace.value.clone(),
                call_type: trace.call_type.clone(),
                data: trace.input.clone(),
            });
        }
        (rows, markers)
    }
}

#[async_trait]
impl ElementIndexer for InternalTxIndexer {
    fn name(&self) -> &str {
        "internal-txs"
    }

    async fn find_relevant_elements(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Element>, IndexingError> {
        let Some((from, to)) = inclusive_bounds(from_block, to_block) else {
            return Ok(vec![]);
        };
        let traces = self.service.client().trace_filter(addresses, from, to).await?;
        debug!(from, to, traces = traces.len(), "traces found");
        Ok(traces.into_iter().map(Element::Trace).collect())
    }

    async fn process_elements(&self, elements: &[Element]) -> Result<usize, IndexingError> {
        let traces: Vec<&RawTrace> = elements
            .iter()
            .filter_map(|e| match e {
                Element::Trace(t) => Some(t),
                Element::Log(_) => None,
            })
            .collect();
        let (rows, markers) = Self::to_rows(&traces);
        store_elements(&self.service, rows, markers).await
    }

    async fn list_tracked_addresses(&self) -> Result<Vec<String>, IndexingError> {
        self.service.store().list_master_copies().await
    }

    fn set_exact_address_mode(&mut self, _exact: bool) {}

    fn exact_address_mode(&self) -> bool {
        true
    }
}

// ─── SafeEventsIndexer ───────────────────────────────────────────────────────

/// Event-based indexer for L2 networks.
///
/// By default it queries every Safe event regardless of the emitting
/// address, so Safes unknown to the store are discovered too. In exact
/// address mode the log query is restricted to the given addresses.
pub struct SafeEventsIndexer {
    service: Arc<IndexService>,
    exact_addresses: bool,
    topics: Vec<String>,
}

impl SafeEventsIndexer {
    pub fn new(service: Arc<IndexService>) -> Self {
        Self {
            service,
            exact_addresses: false,
            topics: SAFE_EVENT_TOPICS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Event logs become pseudo internal transactions keyed by log index.
    fn to_rows(logs: &[&RawLog]) -> (Vec<InternalTx>, Vec<InternalTxDecoded>) {
        let mut rows = Vec::with_capacity(logs.len());
        let mut markers = Vec::with_capacity(logs.len());
        for log in logs.iter().filter(|l| !l.removed) {
            let key = InternalTxKey::new(log.tx_hash.as_str(), format!("log:{}", log.log_index));
            if let Some(topic0) = log.topic0() {
                markers.push(InternalTxDecoded {
                    key: key.clone(),
                    selector: topic0.to_ascii_lowercase(),
                    processed: false,
                });
            }
            rows.push(InternalTx {
                key,
                block_number: log.block_number,
                from: log.address.clone(),
                to: Some(log.address.clone()),
                value: "0".into(),
                call_type: Some("event".into()),
                data: log.data.clone(),
            });
        }
        (rows, markers)
    }
}

#[async_trait]
impl ElementIndexer for SafeEventsIndexer {
    fn name(&self) -> &str {
        "safe-events"
    }

    async fn find_relevant_elements(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Element>, IndexingError> {
        let Some((from, to)) = inclusive_bounds(from_block, to_block) else {
            return Ok(vec![]);
        };
        let address_filter: &[String] = if self.exact_addresses { addresses } else { &[] };
        let logs = self
            .service
            .client()
            .get_logs(address_filter, &self.topics, from, to)
            .await?;
        debug!(from, to, logs = logs.len(), exact = self.exact_addresses, "events found");
        Ok(logs.into_iter().map(Element::Log).collect())
    }

    async fn process_elements(&self, elements: &[Element]) -> Result<usize, IndexingError> {
        let logs: Vec<&RawLog> = elements
            .iter()
            .filter_map(|e| match e {
                Element::Log(l) => Some(l),
                Element::Trace(_) => None,
            })
            .collect();
        let (rows, markers) = Self::to_rows(&logs);
        store_elements(&self.service, rows, markers).await
    }

    async fn list_tracked_addresses(&self) -> Result<Vec<String>, IndexingError> {
        self.service.store().list_safe_contracts().await
    }

    fn set_exact_address_mode(&mut self, exact: bool) {
        self.exact_addresses = exact;
    }

    fn exact_address_mode(&self) -> bool {
        self.exact_addresses
    }
}
