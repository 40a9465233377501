//! safeindex-evm: reconciliation engine, JSON-RPC client, indexers and
//! reindex loop for Ethereum-compatible chains.

pub mod builder;
pub mod client;
pub mod indexers;
pub mod provider;
pub mod reindex;
pub mod rpc;
pub mod service;

pub use builder::{open_store, IndexServiceBuilder, StoreHandles};
pub use client::HttpChainClient;
pub use indexers::{InternalTxIndexer, SafeEventsIndexer};
pub use provider::IndexServiceProvider;
pub use reindex::{ReindexLoop, ReindexReport, ReindexRequest};
pub use service::IndexService;
