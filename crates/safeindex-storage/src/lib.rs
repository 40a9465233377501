//! safeindex-storage: storage backends for SafeIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`IndexStore`](safeindex_core::IndexStore) and
//! [`DerivedStore`](safeindex_core::DerivedStore), including the atomic
//! derived-state unit of work used by reprocessing.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
