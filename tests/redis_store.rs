//! Integration tests for the Redis store against a live redis-stack
//! (RedisJSON + RediSearch).
//!
//! Every test returns early when `REDIS_URL` is not set. Run with:
//!   REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_store -- --nocapture

use assert_matches::assert_matches;
use instance_discovery::domain::InstanceStore;
use instance_discovery::search::SearchReply;
use instance_discovery::{
    Error, InstanceRegistry, InstanceUpdate, Location, RedisInstanceStore, RedisStoreConfig,
    RegistryConfig, SearchQuery,
};
use serde_json::json;
use std::sync::Arc;

async fn connect() -> Option<Arc<RedisInstanceStore>> {
    let url = match std::env::var("REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("REDIS_URL not set, skipping");
            return None;
        }
    };

    let store = RedisInstanceStore::connect(RedisStoreConfig {
        url,
        ..Default::default()
    })
    .await
    .unwrap();
    store.ensure_index().await.unwrap();
    Some(Arc::new(store))
}

/// World id unique to this run so searches only see our documents
fn world() -> String {
    format!("wrld_it_{:08x}", rand::random::<u32>())
}

async fn registered(registry: &InstanceRegistry, id: &str, capacity: u32) {
    registry
        .register(&Location::parse(id).unwrap(), Some(capacity))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_join_leave_keeps_count() {
    let Some(store) = connect().await else { return };
    let registry = InstanceRegistry::new(RegistryConfig::default(), store.clone());
    let id = format!("{}:1", world());
    registered(&registry, &id, 5).await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let player = format!("usr_{}", i);
                registry.add_player(&id, &player).await.unwrap();
                if i % 2 == 0 {
                    registry.remove_player(&id, &player).await.unwrap();
                }
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }

    let instance = registry.get(&id).await.unwrap();
    assert_eq!(instance.player_count.total, 10);
    assert_eq!(instance.players.len(), 10);
    assert!(instance.over_capacity);

    registry.unregister(&id).await.unwrap();
}

#[tokio::test]
async fn test_non_member_leave_and_blocked_join() {
    let Some(store) = connect().await else { return };
    let registry = InstanceRegistry::new(RegistryConfig::default(), store.clone());
    let id = format!("{}:1", world());
    registered(&registry, &id, 10).await;

    registry.add_player(&id, "usr_a").await.unwrap();
    assert_matches!(
        registry.remove_player(&id, "usr_z").await,
        Err(Error::NotAMember { .. })
    );
    assert_eq!(registry.get(&id).await.unwrap().player_count.total, 1);

    registry.block_player(&id, "usr_a").await.unwrap();
    let instance = registry.get(&id).await.unwrap();
    assert!(instance.players.is_empty());
    assert_eq!(instance.player_count.total, 0);
    assert_eq!(instance.blocked_players.len(), 1);

    assert_matches!(
        registry.add_player(&id, "usr_a").await,
        Err(Error::PlayerBlocked { .. })
    );
    assert_eq!(registry.get(&id).await.unwrap().player_count.total, 0);

    assert_matches!(
        registry.add_player("wrld_it_absent:1", "usr_a").await,
        Err(Error::InstanceNotFound { .. })
    );

    registry.unregister(&id).await.unwrap();
}

#[tokio::test]
async fn test_ping_with_older_clock_keeps_last_ping() {
    let Some(store) = connect().await else { return };
    let registry = InstanceRegistry::new(RegistryConfig::default(), store.clone());
    let id = format!("{}:1", world());
    registered(&registry, &id, 10).await;
    let before = registry.get(&id).await.unwrap().last_ping;

    let outcome = store.apply(&id, &InstanceUpdate::Ping, 1).await.unwrap();
    assert_eq!(outcome.last_ping, before);
    assert_eq!(registry.get(&id).await.unwrap().last_ping, before);

    let outcome = store
        .apply(&id, &InstanceUpdate::Ping, before + 60)
        .await
        .unwrap();
    assert_eq!(outcome.last_ping, before + 60);

    registry.unregister(&id).await.unwrap();
}

#[tokio::test]
async fn test_array_pop_out_of_range() {
    let Some(store) = connect().await else { return };
    let registry = InstanceRegistry::new(RegistryConfig::default(), store.clone());
    let id = format!("{}:1", world());
    registered(&registry, &id, 10).await;

    store.append_to_array(&id, "players", json!("a")).await.unwrap();
    store.append_to_array(&id, "players", json!("b")).await.unwrap();

    assert_matches!(
        store.remove_from_array_at_index(&id, "players", 5).await,
        Err(Error::Protocol(_))
    );
    assert_eq!(registry.get(&id).await.unwrap().players.len(), 2);

    let popped = store
        .remove_from_array_at_index(&id, "players", 0)
        .await
        .unwrap();
    assert_eq!(popped, json!("a"));

    registry.unregister(&id).await.unwrap();
}

#[tokio::test]
async fn test_search_reply_decodes_live_reply() {
    let Some(store) = connect().await else { return };
    let registry = InstanceRegistry::new(RegistryConfig::default(), store.clone());
    let world_id = world();
    registered(&registry, &format!("{}:1", world_id), 10).await;
    registered(&registry, &format!("{}:2", world_id), 10).await;
    registry
        .add_player(&format!("{}:2", world_id), "usr-x.y@z")
        .await
        .unwrap();

    let query = SearchQuery::new().world_id(&world_id);
    let rendered = query.to_query_string();

    let url = std::env::var("REDIS_URL").unwrap();
    let mut conn = redis::Client::open(url.as_str())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let value: redis::Value = redis::cmd("FT.SEARCH")
        .arg(&store.config().index_name)
        .arg(&rendered)
        .arg("LIMIT")
        .arg(0)
        .arg(10)
        .query_async(&mut conn)
        .await
        .unwrap();

    let reply = SearchReply::decode(&value, 10, &rendered).unwrap();
    assert_eq!(reply.total, 2);
    let mut ids: Vec<_> = reply
        .into_instances()
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec![format!("{}:1", world_id), format!("{}:2", world_id)]);

    // reserved characters in the player id go through escaping
    let found = registry.find_by_player("usr-x.y@z").await.unwrap();
    assert!(found.iter().any(|i| i.id == format!("{}:2", world_id)));

    assert_matches!(
        registry
            .find_by_world("wrld_it_none", instance_discovery::InstanceType::Public, true)
            .await,
        Err(Error::NoResults { .. })
    );

    registry.unregister(&format!("{}:1", world_id)).await.unwrap();
    registry.unregister(&format!("{}:2", world_id)).await.unwrap();
}
