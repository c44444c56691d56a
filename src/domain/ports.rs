//! Domain Ports - Core trait definitions for the instance store
//!
//! The registry talks to its backing document store only through
//! [`InstanceStore`]. Adapters under `crate::store` implement it against
//! RedisJSON/RediSearch or an in-process map.

use crate::domain::instance::{InstanceUpdate, WorldInstance};
use crate::error::Result;
use crate::search::SearchQuery;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Instance Store
// =============================================================================

/// Single-document storage with path-addressed partial updates.
///
/// Every method is one round trip and atomic for that call only. Paths are
/// dotted field paths relative to the document root (`lastPing`,
/// `playerCount.total`, `players`).
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Fetch a document. An absent key is `Error::InstanceNotFound`.
    async fn get(&self, id: &str) -> Result<WorldInstance>;

    /// Write the whole document; `true` when an existing one was replaced
    async fn put(&self, instance: &WorldInstance) -> Result<bool>;

    /// Overwrite a single existing field
    async fn set_field(&self, id: &str, path: &str, value: serde_json::Value) -> Result<()>;

    /// Append to an array field, returning the new length
    async fn append_to_array(&self, id: &str, path: &str, value: serde_json::Value)
        -> Result<usize>;

    /// Remove the element at `index` of an array field, returning it
    async fn remove_from_array_at_index(
        &self,
        id: &str,
        path: &str,
        index: usize,
    ) -> Result<serde_json::Value>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Apply a membership/liveness transform as one atomic step and
    /// return the resulting document state.
    async fn apply(&self, id: &str, update: &InstanceUpdate, now: i64) -> Result<UpdateOutcome>;

    /// Run a conjunctive tag search. Zero rows is `Error::NoResults`.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<WorldInstance>>;

    /// Create the secondary index if it does not exist
    async fn ensure_index(&self) -> Result<()>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Resulting counters after an atomic transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub total: u32,
    pub over_capacity: bool,
    pub last_ping: i64,
}

impl From<&WorldInstance> for UpdateOutcome {
    fn from(instance: &WorldInstance) -> Self {
        Self {
            total: instance.player_count.total,
            over_capacity: instance.over_capacity,
            last_ping: instance.last_ping,
        }
    }
}

/// Type alias for a shared store handle
pub type SharedInstanceStore = Arc<dyn InstanceStore>;
