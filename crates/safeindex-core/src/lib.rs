//! safeindex-core: foundation for the Safe indexing and reconciliation engine.
//!
//! # Architecture
//!
//! ```text
//! ReindexLoop → ElementIndexer (traces on L1 / events on L2)
//!                    └── IndexService (reconciliation engine)
//!                           ├── ChainClient   (node RPC, single + batch lookups)
//!                           └── IndexStore    (blocks, txs, derived tables)
//! IndexService::reprocess_* → IndexStore::begin_derived (atomic invalidation)
//! ```
//!
//! This crate only holds the types and the collaborator contracts; concrete
//! stores live in `safeindex-storage`, the engine and the RPC client in
//! `safeindex-evm`.

pub mod client;
pub mod config;
pub mod confirmation;
pub mod derived;
pub mod error;
pub mod indexer;
pub mod store;
pub mod types;

pub use client::ChainClient;
pub use config::{IndexServiceConfig, NetworkMode};
pub use confirmation::ConfirmationPolicy;
pub use derived::{AddressScope, InternalTxKey, ReprocessSummary};
pub use error::IndexingError;
pub use indexer::{Element, ElementIndexer};
pub use store::{DerivedCounts, DerivedStateTx, DerivedStore, IndexStore};
pub use types::{EthereumBlock, EthereumTx, RawBlock, RawLog, RawTrace, RawTransaction, TransactionReceipt};
