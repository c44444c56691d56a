//! In-Memory Instance Store
//!
//! DashMap-backed document store holding each instance as a JSON value.
//! Transforms run while the entry's shard lock is held, which gives the same
//! per-document atomicity as the Redis script.

use crate::domain::instance::{instance_key, InstanceUpdate, WorldInstance};
use crate::domain::ports::{InstanceStore, UpdateOutcome};
use crate::error::{Error, Result};
use crate::search::SearchQuery;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

// =============================================================================
// Memory Store Configuration
// =============================================================================

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Number of shards for DashMap; must be a power of two above 1,
    /// anything else falls back to the DashMap default
    pub shard_count: usize,
    /// Maximum rows returned by a search
    pub search_limit: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            shard_count: 0,
            search_limit: 1000,
        }
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process instance store
pub struct MemoryInstanceStore {
    /// Documents keyed by `instances:<id>`
    documents: DashMap<String, Value>,
    /// Transforms applied
    updates: AtomicU64,
    search_limit: usize,
}

impl MemoryInstanceStore {
    /// Create new memory store with default config
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create new memory store with full config
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let documents = if config.shard_count > 1 && config.shard_count.is_power_of_two() {
            DashMap::with_shard_amount(config.shard_count)
        } else {
            if config.shard_count != 0 {
                warn!(
                    "Ignoring shard count {} (not a power of two above 1)",
                    config.shard_count
                );
            }
            DashMap::new()
        };

        Self {
            documents,
            updates: AtomicU64::new(0),
            search_limit: config.search_limit,
        }
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of transforms applied since creation
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Run `f` against a field of an existing document
    fn with_field<T>(
        &self,
        id: &str,
        path: &str,
        f: impl FnOnce(&mut Value) -> Result<T>,
    ) -> Result<T> {
        let mut doc = self
            .documents
            .get_mut(&instance_key(id))
            .ok_or_else(|| Error::instance_not_found(id))?;

        let field = doc
            .pointer_mut(&json_pointer(path))
            .ok_or_else(|| Error::Protocol(format!("path {} does not exist in {}", path, id)))?;

        f(field)
    }
}

impl Default for MemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `playerCount.total` -> `/playerCount/total`
fn json_pointer(path: &str) -> String {
    let path = path.trim_start_matches('$').trim_start_matches('.');
    if path.is_empty() {
        return String::new();
    }
    format!("/{}", path.replace('.', "/"))
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<WorldInstance> {
        let doc = self
            .documents
            .get(&instance_key(id))
            .ok_or_else(|| Error::instance_not_found(id))?;

        serde_json::from_value(doc.value().clone())
            .map_err(|e| Error::Protocol(format!("stored document {} is invalid: {}", id, e)))
    }

    async fn put(&self, instance: &WorldInstance) -> Result<bool> {
        let previous = self
            .documents
            .insert(instance.key(), serde_json::to_value(instance)?);
        Ok(previous.is_some())
    }

    async fn set_field(&self, id: &str, path: &str, value: Value) -> Result<()> {
        self.with_field(id, path, |field| {
            *field = value;
            Ok(())
        })
    }

    async fn append_to_array(&self, id: &str, path: &str, value: Value) -> Result<usize> {
        self.with_field(id, path, |field| match field {
            Value::Array(items) => {
                items.push(value);
                Ok(items.len())
            }
            _ => Err(Error::Protocol(format!("{} is not an array", path))),
        })
    }

    async fn remove_from_array_at_index(&self, id: &str, path: &str, index: usize) -> Result<Value> {
        self.with_field(id, path, |field| match field {
            Value::Array(items) if index < items.len() => Ok(items.remove(index)),
            Value::Array(items) => Err(Error::Protocol(format!(
                "index {} out of range for {} of length {}",
                index,
                path,
                items.len()
            ))),
            _ => Err(Error::Protocol(format!("{} is not an array", path))),
        })
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.documents.remove(&instance_key(id)).is_some())
    }

    async fn apply(&self, id: &str, update: &InstanceUpdate, now: i64) -> Result<UpdateOutcome> {
        let mut doc = self
            .documents
            .get_mut(&instance_key(id))
            .ok_or_else(|| Error::instance_not_found(id))?;

        let mut instance: WorldInstance = serde_json::from_value(doc.value().clone())
            .map_err(|e| Error::Protocol(format!("stored document {} is invalid: {}", id, e)))?;
        instance.apply(update, now)?;

        *doc.value_mut() = serde_json::to_value(&instance)?;
        self.updates.fetch_add(1, Ordering::Relaxed);

        Ok(UpdateOutcome::from(&instance))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<WorldInstance>> {
        let mut found = Vec::new();
        for entry in self.documents.iter() {
            let instance: WorldInstance = serde_json::from_value(entry.value().clone())
                .map_err(|e| {
                    Error::Protocol(format!("stored document {} is invalid: {}", entry.key(), e))
                })?;
            if query.matches(&instance) {
                found.push(instance);
            }
        }

        if found.is_empty() {
            return Err(Error::NoResults {
                query: query.to_query_string(),
            });
        }

        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.truncate(self.search_limit);
        Ok(found)
    }

    async fn ensure_index(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        // Memory storage is always healthy if we got here
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
