//! Process-wide [`IndexService`] instance.
//!
//! Long-running workers (live indexer, reindex jobs, CLI commands) share one
//! service so they share one store handle and one HTTP connection pool.
//! [`IndexServiceProvider::reset`] drops it, e.g. between tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use safeindex_core::config::IndexServiceConfig;
use safeindex_core::error::IndexingError;

use crate::builder::IndexServiceBuilder;
use crate::service::IndexService;

static INSTANCE: Mutex<Option<Arc<IndexService>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<IndexService>>> {
    INSTANCE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accessor for the shared service.
pub struct IndexServiceProvider;

impl IndexServiceProvider {
    /// Return the shared service, building it from `config` on first use.
    ///
    /// If two callers race, both build a service but only the first one
    /// stored is kept and returned to everybody.
    pub async fn get_or_init(config: &IndexServiceConfig) -> Result<Arc<IndexService>, IndexingError> {
        if let Some(service) = Self::current() {
            return Ok(service);
        }
        let built = Arc::new(IndexServiceBuilder::from_config(config.clone()).build().await?);
        let mut slot = slot();
        let service = slot.get_or_insert_with(|| {
            debug!(node_url = %config.node_url, "index service initialised");
            built
        });
        Ok(Arc::clone(service))
    }

    /// Install a prebuilt service, replacing any existing one.
    pub fn set(service: Arc<IndexService>) {
        *slot() = Some(service);
    }

    /// The shared service, if initialised.
    pub fn current() -> Option<Arc<IndexService>> {
        slot().clone()
    }

    /// Drop the shared service. The next `get_or_init` builds a new one.
    pub fn reset() {
        if slot().take().is_some() {
            debug!("index service reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the instance is global to the test binary.
    #[tokio::test]
    async fn singleton_lifecycle() {
        IndexServiceProvider::reset();
        assert!(IndexServiceProvider::current().is_none());

        let config = IndexServiceConfig {
            reorg_depth: 2,
            ..Default::default()
        };
        let first = IndexServiceProvider::get_or_init(&config).await.unwrap();
        let second = IndexServiceProvider::get_or_init(&IndexServiceConfig::default())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.confirmation_policy().reorg_depth, 2);

        IndexServiceProvider::reset();
        let third = IndexServiceProvider::get_or_init(&IndexServiceConfig::default())
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.confirmation_policy().reorg_depth, 10);

        IndexServiceProvider::reset();
    }
}
