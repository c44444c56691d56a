//! Instance Store Backends
//!
//! - Redis: RedisJSON documents with a RediSearch index (production)
//! - Memory: DashMap documents (standalone mode and tests)

pub mod memory;
pub mod redis;

pub use self::memory::{MemoryInstanceStore, MemoryStoreConfig};
pub use self::redis::{RedisInstanceStore, RedisStoreConfig};

use crate::domain::ports::SharedInstanceStore;
use crate::error::{Error, Result};
use std::str::FromStr;
use std::sync::Arc;

/// Which backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(Error::Configuration(format!(
                "unknown store backend: {}. Use 'redis' or 'memory'",
                other
            ))),
        }
    }
}

/// Factory for store backends
pub struct StoreFactory;

impl StoreFactory {
    /// Connect the chosen backend and make sure its index exists
    pub async fn create(backend: StoreBackend, config: RedisStoreConfig) -> Result<SharedInstanceStore> {
        let store: SharedInstanceStore = match backend {
            StoreBackend::Redis => Arc::new(RedisInstanceStore::connect(config).await?),
            StoreBackend::Memory => Arc::new(MemoryInstanceStore::with_config(MemoryStoreConfig {
                search_limit: config.search_limit,
                ..Default::default()
            })),
        };

        store.ensure_index().await?;
        Ok(store)
    }
}
