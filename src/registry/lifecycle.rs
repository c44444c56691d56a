//! Instance Lifecycle
//!
//! Composes store primitives, atomic transforms and index searches into
//! the operations the route layer calls:
//! - register / unregister
//! - ping
//! - add / remove / block player
//! - lookups by id, short name, world and player

use crate::domain::instance::{
    InstanceType, InstanceUpdate, PlayerCount, WorldInstance, DEFAULT_CAPACITY,
};
use crate::domain::location::Location;
use crate::domain::ports::{SharedInstanceStore, UpdateOutcome};
use crate::error::{Error, Result};
use crate::registry::metrics::RegistryMetrics;
use crate::registry::names::SecureNameGenerator;
use crate::search::SearchQuery;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity used when the caller does not supply one
    pub default_capacity: u32,
    /// Draws per name before giving up; 0 skips the store check
    pub name_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_CAPACITY,
            name_attempts: 5,
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Unix-seconds clock that never goes backwards within the process
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn now(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp();
        let prev = self.last.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

// =============================================================================
// Instance Registry
// =============================================================================

/// Ephemeral registry of running world instances
pub struct InstanceRegistry {
    config: RegistryConfig,
    store: SharedInstanceStore,
    names: SecureNameGenerator,
    clock: MonotonicClock,
    metrics: RegistryMetrics,
}

impl InstanceRegistry {
    /// Create a new registry over a store
    pub fn new(config: RegistryConfig, store: SharedInstanceStore) -> Arc<Self> {
        Self::with_names(config, store, SecureNameGenerator::new())
    }

    /// Create a registry with a specific name generator
    pub fn with_names(
        config: RegistryConfig,
        store: SharedInstanceStore,
        names: SecureNameGenerator,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            names,
            clock: MonotonicClock::default(),
            metrics: RegistryMetrics::new(),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedInstanceStore {
        &self.store
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Fetch an instance by id
    pub async fn get(&self, id: &str) -> Result<WorldInstance> {
        let result = self.store.get(id).await;
        self.metrics.observe("get", &result);
        result
    }

    /// Register an instance.
    ///
    /// Upsert: an existing document with the same id is replaced, players
    /// included.
    pub async fn register(&self, location: &Location, capacity: Option<u32>) -> Result<WorldInstance> {
        let result = self.register_inner(location, capacity).await;
        self.metrics.observe("register", &result);
        result
    }

    async fn register_inner(&self, location: &Location, capacity: Option<u32>) -> Result<WorldInstance> {
        let id = location.id();

        let short_name = self.mint_name().await?;
        let secure_name = self.mint_name().await?;

        let instance = WorldInstance {
            id: id.clone(),
            instance_id: location.instance_id.clone(),
            world_id: location.world_id.clone(),
            instance_type: location.instance_type,
            instance_owner_id: location.owner_id.clone(),
            capacity: capacity.unwrap_or(self.config.default_capacity),
            player_count: PlayerCount::default(),
            players: Vec::new(),
            blocked_players: Vec::new(),
            short_name,
            secure_name,
            last_ping: self.clock.now(),
            over_capacity: false,
        };

        if self.store.put(&instance).await? {
            warn!("Replaced registered instance {}", id);
        }
        info!(
            "Registered instance {} (type={}, capacity={}, shortName={})",
            id, instance.instance_type, instance.capacity, instance.short_name
        );

        Ok(instance)
    }

    /// Remove an instance. Removing an absent instance succeeds.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let result = self.store.delete(id).await;
        self.metrics.observe("unregister", &result);

        if result? {
            info!("Unregistered instance {}", id);
        } else {
            debug!("Unregister of absent instance {} ignored", id);
        }
        Ok(())
    }

    /// Mark an instance as alive. `lastPing` is only ever raised.
    pub async fn ping(&self, id: &str) -> Result<()> {
        let result = self
            .store
            .apply(id, &InstanceUpdate::Ping, self.clock.now())
            .await;
        self.metrics.observe("ping", &result);
        result.map(|_| ())
    }

    /// Add a player to an instance
    pub async fn add_player(&self, id: &str, player_id: &str) -> Result<UpdateOutcome> {
        self.update(id, InstanceUpdate::Join(player_id.to_string()), "add_player")
            .await
    }

    /// Remove a player from an instance
    pub async fn remove_player(&self, id: &str, player_id: &str) -> Result<UpdateOutcome> {
        self.update(id, InstanceUpdate::Leave(player_id.to_string()), "remove_player")
            .await
    }

    async fn update(
        &self,
        id: &str,
        update: InstanceUpdate,
        operation: &'static str,
    ) -> Result<UpdateOutcome> {
        let result = self.store.apply(id, &update, self.clock.now()).await;
        self.metrics.observe(operation, &result);

        let outcome = result?;
        self.metrics.last_player_total.set(outcome.total as i64);
        debug!(
            "{} {:?} on {}: total={} overCapacity={}",
            operation,
            update.player_id(),
            id,
            outcome.total,
            outcome.over_capacity
        );
        Ok(outcome)
    }

    /// Block a player from an instance, removing them if present.
    /// The marker and the removal land in one transform.
    pub async fn block_player(&self, id: &str, player_id: &str) -> Result<()> {
        self.update(id, InstanceUpdate::Block(player_id.to_string()), "block_player")
            .await?;
        info!("Blocked player {} from instance {}", player_id, id);
        Ok(())
    }

    /// Instances of a world with the given privacy class
    pub async fn find_by_world(
        &self,
        world_id: &str,
        privacy: InstanceType,
        include_over_capacity: bool,
    ) -> Result<Vec<WorldInstance>> {
        let mut query = SearchQuery::new().world_id(world_id).instance_type(privacy);
        if !include_over_capacity {
            query = query.over_capacity(false);
        }

        let result = self.store.search(&query).await;
        self.metrics.observe("find_by_world", &result);
        result
    }

    /// Instances a player is currently in
    pub async fn find_by_player(&self, player_id: &str) -> Result<Vec<WorldInstance>> {
        let result = self.store.search(&SearchQuery::new().player(player_id)).await;
        self.metrics.observe("find_by_player", &result);
        result
    }

    /// Resolve a short name, falling back to the secure name
    pub async fn find_by_short_name(&self, name: &str) -> Result<WorldInstance> {
        let result = self.find_by_short_name_inner(name).await;
        self.metrics.observe("find_by_short_name", &result);
        result
    }

    async fn find_by_short_name_inner(&self, name: &str) -> Result<WorldInstance> {
        let rows = match self.store.search(&SearchQuery::new().short_name(name)).await {
            Err(e) if e.is_not_found() => {
                self.store
                    .search(&SearchQuery::new().secure_name(name))
                    .await?
            }
            other => other?,
        };

        rows.into_iter().next().ok_or_else(|| Error::NoResults {
            query: format!("shortName|secureName = {}", name),
        })
    }

    /// Draw a name, re-drawing while the store already knows it
    async fn mint_name(&self) -> Result<String> {
        if self.config.name_attempts == 0 {
            return Ok(self.names.generate());
        }

        for attempt in 1..=self.config.name_attempts {
            let candidate = self.names.generate();
            if !self.name_in_use(&candidate).await? {
                return Ok(candidate);
            }
            warn!("Instance name {} already in use (attempt {})", candidate, attempt);
        }

        Err(Error::NameCollision {
            attempts: self.config.name_attempts,
        })
    }

    async fn name_in_use(&self, name: &str) -> Result<bool> {
        for query in [
            SearchQuery::new().short_name(name),
            SearchQuery::new().secure_name(name),
        ] {
            match self.store.search(&query).await {
                Ok(rows) if !rows.is_empty() => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::InstanceStore;
    use crate::store::MemoryInstanceStore;
    use assert_matches::assert_matches;

    fn registry() -> Arc<InstanceRegistry> {
        InstanceRegistry::new(
            RegistryConfig::default(),
            Arc::new(MemoryInstanceStore::new()),
        )
    }

    async fn register(registry: &InstanceRegistry, location: &str) -> WorldInstance {
        registry
            .register(&Location::parse(location).unwrap(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_get() {
        let registry = registry();
        let instance = register(&registry, "wrld_abc:12345").await;

        assert_eq!(instance.player_count.total, 0);
        assert!(instance.players.is_empty());
        assert_eq!(instance.capacity, DEFAULT_CAPACITY);
        assert_ne!(instance.short_name, "");

        let fetched = registry.get("wrld_abc:12345").await.unwrap();
        assert_eq!(fetched.world_id, "wrld_abc");
        assert_eq!(fetched, instance);
    }

    #[tokio::test]
    async fn test_register_is_upsert() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;
        registry.add_player("wrld_abc:1", "usr_a").await.unwrap();

        let replaced = registry
            .register(&Location::parse("wrld_abc:1").unwrap(), Some(20))
            .await
            .unwrap();
        assert_eq!(replaced.capacity, 20);
        assert_eq!(registry.get("wrld_abc:1").await.unwrap().player_count.total, 0);
    }

    #[tokio::test]
    async fn test_unregister_idempotent() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;

        registry.unregister("wrld_abc:1").await.unwrap();
        assert_matches!(
            registry.get("wrld_abc:1").await,
            Err(Error::InstanceNotFound { .. })
        );
        registry.unregister("wrld_abc:1").await.unwrap();
    }

    #[tokio::test]
    async fn test_ping() {
        let registry = registry();
        let instance = register(&registry, "wrld_abc:1").await;

        registry.ping("wrld_abc:1").await.unwrap();
        let pinged = registry.get("wrld_abc:1").await.unwrap();
        assert!(pinged.last_ping >= instance.last_ping);

        assert_matches!(
            registry.ping("wrld_abc:404").await,
            Err(Error::InstanceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_ping_keeps_newer_last_ping() {
        let registry = registry();
        let mut instance = register(&registry, "wrld_abc:1").await;
        instance.last_ping = i64::MAX;
        registry.store().put(&instance).await.unwrap();

        registry.ping("wrld_abc:1").await.unwrap();
        assert_eq!(registry.get("wrld_abc:1").await.unwrap().last_ping, i64::MAX);
    }

    #[tokio::test]
    async fn test_membership_invariant() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;

        for p in ["usr_a", "usr_b", "usr_c"] {
            registry.add_player("wrld_abc:1", p).await.unwrap();
            let i = registry.get("wrld_abc:1").await.unwrap();
            assert_eq!(i.player_count.total as usize, i.players.len());
        }

        let outcome = registry.remove_player("wrld_abc:1", "usr_b").await.unwrap();
        assert_eq!(outcome.total, 2);

        let i = registry.get("wrld_abc:1").await.unwrap();
        assert_eq!(i.players, vec!["usr_a".to_string(), "usr_c".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_non_member() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;
        registry.add_player("wrld_abc:1", "usr_a").await.unwrap();

        assert_matches!(
            registry.remove_player("wrld_abc:1", "usr_z").await,
            Err(Error::NotAMember { .. })
        );
        assert_eq!(registry.get("wrld_abc:1").await.unwrap().player_count.total, 1);
    }

    #[tokio::test]
    async fn test_concurrent_join_leave() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let player = format!("usr_{}", i);
                    registry.add_player("wrld_abc:1", &player).await.unwrap();
                    if i % 5 == 0 {
                        registry.remove_player("wrld_abc:1", &player).await.unwrap();
                    }
                })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap();
        }

        let i = registry.get("wrld_abc:1").await.unwrap();
        assert_eq!(i.player_count.total, 40);
        assert_eq!(i.players.len(), 40);
        assert!(i.over_capacity);
    }

    #[tokio::test]
    async fn test_find_by_world() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;
        register(&registry, "wrld_abc:2").await;
        register(&registry, "wrld_abc:3~friends(usr_owner)").await;

        let public = registry
            .find_by_world("wrld_abc", InstanceType::Public, false)
            .await
            .unwrap();
        assert_eq!(public.len(), 2);

        let friends = registry
            .find_by_world("wrld_abc", InstanceType::Friends, false)
            .await
            .unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].instance_owner_id, "usr_owner");

        assert_matches!(
            registry
                .find_by_world("wrld_none", InstanceType::Public, true)
                .await,
            Err(Error::NoResults { .. })
        );
    }

    #[tokio::test]
    async fn test_find_by_world_over_capacity() {
        let registry = registry();
        registry
            .register(&Location::parse("wrld_abc:1").unwrap(), Some(1))
            .await
            .unwrap();
        registry.add_player("wrld_abc:1", "usr_a").await.unwrap();
        registry.add_player("wrld_abc:1", "usr_b").await.unwrap();

        assert_matches!(
            registry.find_by_world("wrld_abc", InstanceType::Public, false).await,
            Err(Error::NoResults { .. })
        );
        let all = registry
            .find_by_world("wrld_abc", InstanceType::Public, true)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_player() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;
        register(&registry, "wrld_xyz:2").await;
        registry.add_player("wrld_abc:1", "usr_a").await.unwrap();
        registry.add_player("wrld_xyz:2", "usr_a").await.unwrap();

        let found = registry.find_by_player("usr_a").await.unwrap();
        assert_eq!(found.len(), 2);

        assert_matches!(
            registry.find_by_player("usr_nobody").await,
            Err(Error::NoResults { .. })
        );
    }

    #[tokio::test]
    async fn test_short_name_alias_fallback() {
        let store = Arc::new(MemoryInstanceStore::new());
        let registry = InstanceRegistry::new(RegistryConfig::default(), store.clone());

        let mut instance = register(&registry, "wrld_abc:1").await;
        instance.short_name = "ab12cd34".into();
        instance.secure_name = "zz99yy88".into();
        store.put(&instance).await.unwrap();

        let by_short = registry.find_by_short_name("ab12cd34").await.unwrap();
        assert_eq!(by_short.id, "wrld_abc:1");

        let by_secure = registry.find_by_short_name("zz99yy88").await.unwrap();
        assert_eq!(by_secure.id, "wrld_abc:1");

        assert_matches!(
            registry.find_by_short_name("00000000").await,
            Err(Error::NoResults { .. })
        );
    }

    #[tokio::test]
    async fn test_block_player() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;
        registry.add_player("wrld_abc:1", "usr_bad").await.unwrap();

        registry.block_player("wrld_abc:1", "usr_bad").await.unwrap();

        let i = registry.get("wrld_abc:1").await.unwrap();
        assert!(i.players.is_empty());
        assert_eq!(i.player_count.total, 0);
        assert_eq!(i.blocked_players.len(), 1);

        assert_matches!(
            registry.add_player("wrld_abc:1", "usr_bad").await,
            Err(Error::PlayerBlocked { .. })
        );

        // not a member: marker only
        registry.block_player("wrld_abc:1", "usr_other").await.unwrap();
        assert_eq!(registry.get("wrld_abc:1").await.unwrap().blocked_players.len(), 2);

        assert_matches!(
            registry.block_player("wrld_abc:404", "usr_bad").await,
            Err(Error::InstanceNotFound { .. })
        );
    }

    /// Memory store whose transforms always time out
    struct TimeoutOnApply(MemoryInstanceStore);

    #[async_trait::async_trait]
    impl InstanceStore for TimeoutOnApply {
        fn name(&self) -> &str {
            "timeout-on-apply"
        }
        async fn get(&self, id: &str) -> Result<WorldInstance> {
            self.0.get(id).await
        }
        async fn put(&self, instance: &WorldInstance) -> Result<bool> {
            self.0.put(instance).await
        }
        async fn set_field(&self, id: &str, path: &str, value: serde_json::Value) -> Result<()> {
            self.0.set_field(id, path, value).await
        }
        async fn append_to_array(
            &self,
            id: &str,
            path: &str,
            value: serde_json::Value,
        ) -> Result<usize> {
            self.0.append_to_array(id, path, value).await
        }
        async fn remove_from_array_at_index(
            &self,
            id: &str,
            path: &str,
            index: usize,
        ) -> Result<serde_json::Value> {
            self.0.remove_from_array_at_index(id, path, index).await
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            self.0.delete(id).await
        }
        async fn apply(&self, _: &str, _: &InstanceUpdate, _: i64) -> Result<UpdateOutcome> {
            Err(Error::StoreTimeout {
                operation: "apply",
                timeout: std::time::Duration::from_millis(1),
            })
        }
        async fn search(&self, query: &SearchQuery) -> Result<Vec<WorldInstance>> {
            self.0.search(query).await
        }
        async fn ensure_index(&self) -> Result<()> {
            Ok(())
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_failed_block_leaves_document_untouched() {
        let memory = MemoryInstanceStore::new();
        let mut instance = crate::domain::instance::tests::sample_instance("wrld_abc:1", 10);
        instance
            .apply(&InstanceUpdate::Join("usr_bad".into()), 200)
            .unwrap();
        memory.put(&instance).await.unwrap();

        let registry =
            InstanceRegistry::new(RegistryConfig::default(), Arc::new(TimeoutOnApply(memory)));
        assert_matches!(
            registry.block_player("wrld_abc:1", "usr_bad").await,
            Err(Error::StoreTimeout { .. })
        );

        let after = registry.get("wrld_abc:1").await.unwrap();
        assert!(after.blocked_players.is_empty());
        assert_eq!(after.players, vec!["usr_bad".to_string()]);
        assert_eq!(after.player_count.total, 1);
    }

    #[tokio::test]
    async fn test_reregister_replaces_document() {
        let registry = registry();
        register(&registry, "wrld_abc:1").await;
        registry.add_player("wrld_abc:1", "usr_a").await.unwrap();

        let replaced = register(&registry, "wrld_abc:1").await;
        assert_eq!(replaced.player_count.total, 0);
        assert!(registry.get("wrld_abc:1").await.unwrap().players.is_empty());
    }

    #[tokio::test]
    async fn test_name_collision_exhausts() {
        let store = Arc::new(MemoryInstanceStore::new());
        let config = RegistryConfig {
            name_attempts: 1,
            ..Default::default()
        };

        // Two generators with the same seed draw the same first name
        let first = InstanceRegistry::with_names(
            config.clone(),
            store.clone(),
            SecureNameGenerator::with_seed(42),
        );
        first
            .register(&Location::parse("wrld_abc:1").unwrap(), None)
            .await
            .unwrap();

        let second =
            InstanceRegistry::with_names(config, store, SecureNameGenerator::with_seed(42));
        assert_matches!(
            second
                .register(&Location::parse("wrld_abc:2").unwrap(), None)
                .await,
            Err(Error::NameCollision { attempts: 1 })
        );
    }

    #[test]
    fn test_clock_monotonic() {
        let clock = MonotonicClock::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
