//! Reindexing through the real indexers against a scripted node.

mod common;

use common::{service, service_with, MockChainClient};
use safeindex_core::config::NetworkMode;
use safeindex_core::error::IndexingError;
use safeindex_core::store::{DerivedStore, IndexStore};
use safeindex_core::types::{RawLog, RawTrace};
use safeindex_evm::indexers::SAFE_EVENT_TOPICS;

const MASTER_COPY: &str = "0x41675c099f32341bf84bfc5382af534df5c7461a";
const SAFE: &str = "0x5afe000000000000000000000000000000000001";

fn delegatecall(tx_hash: &str, block_number: u64) -> RawTrace {
    RawTrace {
        tx_hash: tx_hash.into(),
        block_number,
        trace_address: "0".into(),
        call_type: Some("delegatecall".into()),
        from: SAFE.into(),
        to: Some(MASTER_COPY.into()),
        value: "0".into(),
        input: "0x6a7612020000".into(),
        error: None,
    }
}

fn safe_event(tx_hash: &str, block_number: u64, address: &str) -> RawLog {
    RawLog {
        address: address.into(),
        topics: vec![SAFE_EVENT_TOPICS[0].into()],
        data: "0x".into(),
        block_number,
        block_hash: common::block_hash(block_number),
        tx_hash: tx_hash.into(),
        log_index: 0,
        removed: false,
    }
}

#[tokio::test]
async fn invalid_range_is_rejected_before_any_call() {
    let mock = MockChainClient::new(1_000);
    let (service, _store) = service(&mock);

    let err = service
        .reindex_master_copies(500, Some(500), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexingError::InvalidBlockRange { from_block: 500, to_block: 500 }));
    assert!(err.is_precondition());

    let err = service
        .reindex_master_copies(0, Some(10), Some(0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexingError::InvalidChunkSize));

    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn traces_are_replayed_in_chunks() {
    let mock = MockChainClient::new(1_000);
    mock.add_mined_tx("0xt1", 50);
    mock.add_mined_tx("0xt2", 180);
    mock.add_mined_tx("0xt3", 260);
    mock.add_trace(delegatecall("0xt1", 50));
    mock.add_trace(delegatecall("0xt2", 180));
    // beyond to_block but inside the overshooting last chunk
    mock.add_trace(delegatecall("0xt3", 260));
    let (service, store) = service(&mock);
    store.add_master_copy(MASTER_COPY).await.unwrap();

    let report = service
        .reindex_master_copies(0, Some(250), Some(100), None)
        .await
        .unwrap();

    let ranges: Vec<String> = mock
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("trace_filter"))
        .collect();
    assert_eq!(
        ranges,
        vec!["trace_filter:0-99", "trace_filter:100-199", "trace_filter:200-299"]
    );
    assert_eq!(report.chunks, 3);
    assert_eq!(report.stop_block, 250);
    assert_eq!(report.elements_found, 3);
    assert_eq!(report.elements_processed, 3);

    let counts = store.derived_counts().await.unwrap();
    assert_eq!(counts.internal_txs, 3);
    assert_eq!(counts.decoded_pending, 3);
    assert_eq!(counts.transactions, 3);
    assert!(store.get_transaction("0xt2").await.unwrap().unwrap().is_mined());
}

#[tokio::test]
async fn reindex_is_idempotent() {
    let mock = MockChainClient::new(1_000);
    mock.add_mined_tx("0xt1", 10);
    mock.add_trace(delegatecall("0xt1", 10));
    let (service, store) = service(&mock);
    store.add_master_copy(MASTER_COPY).await.unwrap();

    let first = service.reindex_master_copies(0, Some(100), None, None).await.unwrap();
    let before = store.derived_counts().await.unwrap();
    let second = service.reindex_master_copies(0, Some(100), None, None).await.unwrap();

    assert_eq!(first.elements_processed, 1);
    assert_eq!(second.elements_found, 1);
    assert_eq!(second.elements_processed, 0);
    assert_eq!(store.derived_counts().await.unwrap(), before);
}

#[tokio::test]
async fn nothing_tracked_means_nothing_to_do() {
    let mock = MockChainClient::new(1_000);
    let (service, _store) = service(&mock);

    let report = service.reindex_master_copies(0, None, None, None).await.unwrap();
    assert_eq!(report.addresses, 0);
    assert_eq!(report.chunks, 0);
    assert_eq!(mock.call_count("trace_filter"), 0);
}

#[tokio::test]
async fn l2_uses_safe_events() {
    let mock = MockChainClient::new(300);
    mock.add_mined_tx("0xe1", 120);
    mock.add_log(safe_event("0xe1", 120, SAFE));
    let (service, store) = service_with(&mock, NetworkMode::L2);
    store.add_safe_contract(SAFE).await.unwrap();

    let report = service
        .reindex_master_copies(100, Some(200), Some(50), None)
        .await
        .unwrap();

    assert_eq!(report.indexer, "safe-events");
    assert_eq!(report.chunks, 2);
    assert_eq!(report.elements_processed, 1);
    assert_eq!(mock.call_count("trace_filter"), 0);
    // default mode queries Safe events from any address
    assert_eq!(mock.call_count("get_logs:100-149:0"), 1);

    let counts = store.derived_counts().await.unwrap();
    assert_eq!(counts.internal_txs, 1);
    assert_eq!(counts.decoded_pending, 1);
}

#[tokio::test]
async fn explicit_addresses_restrict_the_log_query() {
    let mock = MockChainClient::new(300);
    mock.add_mined_tx("0xe1", 120);
    mock.add_mined_tx("0xe2", 130);
    mock.add_log(safe_event("0xe1", 120, SAFE));
    mock.add_log(safe_event("0xe2", 130, "0x0000000000000000000000000000000000000bad"));
    let (service, store) = service_with(&mock, NetworkMode::L2);

    let report = service
        .reindex_master_copies(100, Some(200), Some(100), Some(vec![SAFE.into()]))
        .await
        .unwrap();

    assert_eq!(report.addresses, 1);
    assert_eq!(report.elements_found, 1);
    assert_eq!(mock.call_count("get_logs:100-199:1"), 1);
    assert!(store.get_transaction("0xe2").await.unwrap().is_none());
}

#[tokio::test]
async fn explicit_master_copies_limit_the_trace_scan() {
    const OTHER_COPY: &str = "0x3e5c63644e683549055b9be8653de26e0b4cd36e";
    let mock = MockChainClient::new(1_000);
    mock.add_mined_tx("0xt1", 10);
    mock.add_mined_tx("0xt2", 20);
    mock.add_trace(delegatecall("0xt1", 10));
    let mut other = delegatecall("0xt2", 20);
    other.to = Some(OTHER_COPY.into());
    mock.add_trace(other);
    let (service, store) = service(&mock);
    store.add_master_copy(MASTER_COPY).await.unwrap();
    store.add_master_copy(OTHER_COPY).await.unwrap();

    let report = service
        .reindex_master_copies(0, Some(100), None, Some(vec![OTHER_COPY.into()]))
        .await
        .unwrap();

    assert_eq!(report.addresses, 1);
    assert_eq!(report.elements_processed, 1);
    assert!(store.get_transaction("0xt1").await.unwrap().is_none());
    assert!(store.get_transaction("0xt2").await.unwrap().is_some());
}
