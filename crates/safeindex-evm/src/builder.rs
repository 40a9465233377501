//! Fluent builder API for creating an [`IndexService`].
//!
//! # Example
//!
//! ```rust,no_run
//! use safeindex_core::NetworkMode;
//! use safeindex_evm::IndexServiceBuilder;
//!
//! # async fn example() -> Result<(), safeindex_core::IndexingError> {
//! let service = IndexServiceBuilder::new()
//!     .node_url("https://rpc.gnosischain.com")
//!     .reorg_depth(6)
//!     .network_mode(NetworkMode::L2)
//!     .reindex_chunk_size(500)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use safeindex_core::client::ChainClient;
use safeindex_core::config::{IndexServiceConfig, NetworkMode};
use safeindex_core::error::IndexingError;
use safeindex_core::store::{DerivedStore, IndexStore};
use safeindex_storage::InMemoryStore;

use crate::client::HttpChainClient;
use crate::service::IndexService;

/// Both views of one store instance.
pub type StoreHandles = (Arc<dyn IndexStore>, Arc<dyn DerivedStore>);

/// Open the store named by `database_url`; `None` opens an in-memory store.
pub async fn open_store(database_url: Option<&str>) -> Result<StoreHandles, IndexingError> {
    match database_url {
        None => {
            let store = Arc::new(InMemoryStore::new());
            let index: Arc<dyn IndexStore> = store.clone();
            let derived: Arc<dyn DerivedStore> = store;
            Ok((index, derived))
        }
        Some(url) => open_sqlite(url).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(url: &str) -> Result<StoreHandles, IndexingError> {
    let store = Arc::new(safeindex_storage::SqliteStore::open(url).await?);
    tracing::info!(url, "sqlite store opened");
    let index: Arc<dyn IndexStore> = store.clone();
    let derived: Arc<dyn DerivedStore> = store;
    Ok((index, derived))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(url: &str) -> Result<StoreHandles, IndexingError> {
    Err(IndexingError::Config(format!(
        "database_url '{url}' needs the `sqlite` feature"
    )))
}

/// Fluent builder for `IndexService`.
#[derive(Default)]
pub struct IndexServiceBuilder {
    config: IndexServiceConfig,
    client: Option<Arc<dyn ChainClient>>,
    store: Option<Arc<dyn IndexStore>>,
}

impl IndexServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexServiceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the JSON-RPC endpoint.
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.config.node_url = url.into();
        self
    }

    /// Set the reorg depth (blocks behind head before a block is confirmed).
    pub fn reorg_depth(mut self, depth: u64) -> Self {
        self.config.reorg_depth = depth;
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.config.network_mode = mode;
        self
    }

    /// Set the default number of blocks per reindex chunk.
    pub fn reindex_chunk_size(mut self, size: u64) -> Self {
        self.config.reindex_chunk_size = size;
        self
    }

    /// Set the maximum requests per JSON-RPC batch.
    pub fn rpc_batch_size(mut self, size: usize) -> Self {
        self.config.rpc_batch_size = size;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Persist to SQLite at this location instead of memory.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Use this chain client instead of an `HttpChainClient`.
    pub fn client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use this store instead of opening one from `database_url`.
    pub fn store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the `IndexServiceConfig`.
    pub fn build_config(self) -> IndexServiceConfig {
        self.config
    }

    /// Validate the configuration and assemble the service.
    pub async fn build(self) -> Result<IndexService, IndexingError> {
        self.config.validate()?;

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(HttpChainClient::from_config(&self.config)?),
        };
        let store = match self.store {
            Some(store) => store,
            None => open_store(self.config.database_url.as_deref()).await?.0,
        };

        Ok(IndexService::new(
            client,
            store,
            self.config.confirmation_policy(),
            self.config.network_mode,
            self.config.reindex_chunk_size,
        ))
    }
}
