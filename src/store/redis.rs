//! RedisJSON / RediSearch Instance Store
//!
//! Documents live at `instances:<id>` as JSON. Single-field primitives map
//! onto one `JSON.*` command each, except the bounds-checked array pop.
//! Membership transforms run as one Lua script so count, membership,
//! block list, capacity flag and ping move together.

use crate::domain::instance::{
    instance_key, BlockedPlayer, InstanceUpdate, WorldInstance, INSTANCE_KEY_PREFIX,
};
use crate::domain::ports::{InstanceStore, UpdateOutcome};
use crate::error::{Error, Result};
use crate::search::{SearchQuery, SearchReply, TagField};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL
    pub url: String,
    /// Name of the RediSearch index over instance documents
    pub index_name: String,
    /// Bound on every store round trip
    pub timeout: Duration,
    /// `LIMIT 0 <n>` sent with every search
    pub search_limit: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            index_name: "instanceIdx".to_string(),
            timeout: Duration::from_secs(2),
            search_limit: 1000,
        }
    }
}

// =============================================================================
// Update Script
// =============================================================================

/// KEYS[1] = document key
/// ARGV = op, JSON-encoded player id, now, raw player id, JSON block marker
/// Returns { total, overCapacity (0|1), lastPing }
const UPDATE_SCRIPT: &str = r#"
local key = KEYS[1]
local op = ARGV[1]
local player = ARGV[2]
local now = tonumber(ARGV[3])
local raw_player = ARGV[4]
local marker = ARGV[5]

if redis.call('EXISTS', key) == 0 then
  return redis.error_reply('NOTFOUND instance does not exist')
end

local function is_blocked()
  local blocked = cjson.decode(redis.call('JSON.GET', key, '$.blockedPlayers[*].playerId'))
  for _, id in ipairs(blocked) do
    if id == raw_player then
      return true
    end
  end
  return false
end

local function remove_player()
  local index = redis.call('JSON.ARRINDEX', key, '.players', player)
  if index == -1 then
    return false
  end
  redis.call('JSON.ARRPOP', key, '.players', index)
  redis.call('JSON.NUMINCRBY', key, '.playerCount.total', -1)
  return true
end

if op == 'join' then
  if redis.call('JSON.ARRINDEX', key, '.players', player) == -1 then
    if is_blocked() then
      return redis.error_reply('BLOCKED player is blocked from this instance')
    end
    redis.call('JSON.ARRAPPEND', key, '.players', player)
    redis.call('JSON.NUMINCRBY', key, '.playerCount.total', 1)
  end
elseif op == 'leave' then
  if not remove_player() then
    return redis.error_reply('NOTMEMBER player is not in this instance')
  end
elseif op == 'block' then
  if not is_blocked() then
    redis.call('JSON.ARRAPPEND', key, '.blockedPlayers', marker)
  end
  remove_player()
end

local total = tonumber(redis.call('JSON.GET', key, '.playerCount.total'))
local capacity = tonumber(redis.call('JSON.GET', key, '.capacity'))
local over = total > capacity
redis.call('JSON.SET', key, '.overCapacity', over and 'true' or 'false')

local last = tonumber(redis.call('JSON.GET', key, '.lastPing'))
if now > last then
  redis.call('JSON.SET', key, '.lastPing', ARGV[3])
  last = now
end

return { total, over and 1 or 0, last }
"#;

/// KEYS[1] = document key
/// ARGV = JSONPath of the array, index
/// Returns the popped element as JSON
const POP_SCRIPT: &str = r#"
local key = KEYS[1]
local path = ARGV[1]
local index = tonumber(ARGV[2])

if redis.call('EXISTS', key) == 0 then
  return redis.error_reply('NOTFOUND instance does not exist')
end

local lengths = redis.call('JSON.ARRLEN', key, path)
local len = lengths[1]
if type(len) ~= 'number' then
  return redis.error_reply('NOTARRAY path is not an array')
end
if index >= len then
  return redis.error_reply('OUTOFRANGE index is past the end of the array')
end

return redis.call('JSON.ARRPOP', key, path, index)[1]
"#;

// =============================================================================
// Redis Store
// =============================================================================

/// Instance store backed by RedisJSON and RediSearch
pub struct RedisInstanceStore {
    config: RedisStoreConfig,
    /// Multiplexed connection shared by every request
    conn: ConnectionManager,
    update_script: Script,
    pop_script: Script,
}

impl RedisInstanceStore {
    /// Connect to Redis
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        info!("Connecting to instance store at {}", config.url);

        let client = redis::Client::open(config.url.as_str())?;
        let conn = match tokio::time::timeout(config.timeout, ConnectionManager::new(client)).await
        {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(Error::StoreTimeout {
                    operation: "connect",
                    timeout: config.timeout,
                })
            }
        };

        Ok(Self {
            config,
            conn,
            update_script: Script::new(UPDATE_SCRIPT),
            pop_script: Script::new(POP_SCRIPT),
        })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Run one round trip under the configured timeout
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        debug!(operation, "store round trip");
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::StoreTimeout {
                operation,
                timeout: self.config.timeout,
            }),
        }
    }

    /// `FT.CREATE` arguments for the instance index
    fn index_schema(&self) -> redis::Cmd {
        let mut cmd = redis::cmd("FT.CREATE");
        cmd.arg(&self.config.index_name)
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(INSTANCE_KEY_PREFIX)
            .arg("SCHEMA");
        for field in TagField::ALL {
            cmd.arg(field.json_path())
                .arg("AS")
                .arg(field.attribute())
                .arg("TAG");
        }
        cmd
    }
}

/// `playerCount.total` -> `$.playerCount.total`
fn json_path(path: &str) -> String {
    if path.starts_with('$') {
        path.to_string()
    } else {
        format!("$.{}", path.trim_start_matches('.'))
    }
}

/// Map script error replies onto registry errors
fn map_script_error(err: redis::RedisError, id: &str, update: &InstanceUpdate) -> Error {
    script_error(err.code(), id, update).unwrap_or(Error::Store(err))
}

fn script_error(code: Option<&str>, id: &str, update: &InstanceUpdate) -> Option<Error> {
    let player_id = update.player_id().unwrap_or_default().to_string();
    match code? {
        "NOTFOUND" => Some(Error::instance_not_found(id)),
        "NOTMEMBER" => Some(Error::NotAMember {
            instance_id: id.to_string(),
            player_id,
        }),
        "BLOCKED" => Some(Error::PlayerBlocked {
            instance_id: id.to_string(),
            player_id,
        }),
        _ => None,
    }
}

/// Map pop script error replies onto registry errors
fn pop_script_error(err: redis::RedisError, id: &str, path: &str, index: usize) -> Error {
    pop_error(err.code(), id, path, index).unwrap_or(Error::Store(err))
}

fn pop_error(code: Option<&str>, id: &str, path: &str, index: usize) -> Option<Error> {
    match code? {
        "NOTFOUND" => Some(Error::instance_not_found(id)),
        "NOTARRAY" => Some(Error::Protocol(format!("{} is not an array", path))),
        "OUTOFRANGE" => Some(Error::Protocol(format!(
            "index {} out of range for {}",
            index, path
        ))),
        _ => None,
    }
}

/// First element of a JSONPath multi-reply
fn first<T>(values: Vec<Option<T>>, what: &str) -> Result<T> {
    values
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| Error::Protocol(format!("{} did not match an array", what)))
}

#[async_trait]
impl InstanceStore for RedisInstanceStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, id: &str) -> Result<WorldInstance> {
        let mut conn = self.conn.clone();
        let key = instance_key(id);
        let raw: Option<String> = self
            .call("get", async move {
                redis::cmd("JSON.GET").arg(&key).query_async(&mut conn).await
            })
            .await?;

        let raw = raw.ok_or_else(|| Error::instance_not_found(id))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Protocol(format!("stored document {} is invalid: {}", id, e)))
    }

    async fn put(&self, instance: &WorldInstance) -> Result<bool> {
        let key = instance.key();
        let body = serde_json::to_string(instance)?;

        // NX first: a nil reply means a document is already there
        let created: Option<String> = {
            let mut conn = self.conn.clone();
            let (key, body) = (key.clone(), body.clone());
            self.call("put", async move {
                redis::cmd("JSON.SET")
                    .arg(&key)
                    .arg("$")
                    .arg(body)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await
            })
            .await?
        };
        if created.is_some() {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        self.call("put", async move {
            redis::cmd("JSON.SET")
                .arg(&key)
                .arg("$")
                .arg(body)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;
        Ok(true)
    }

    async fn set_field(&self, id: &str, path: &str, value: Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = instance_key(id);
        let path = json_path(path);
        let body = serde_json::to_string(&value)?;

        // XX: only overwrite an existing path; nil means nothing was there
        let reply: Option<String> = self
            .call("set_field", async move {
                redis::cmd("JSON.SET")
                    .arg(&key)
                    .arg(&path)
                    .arg(body)
                    .arg("XX")
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        reply.map(|_| ()).ok_or_else(|| Error::instance_not_found(id))
    }

    async fn append_to_array(&self, id: &str, path: &str, value: Value) -> Result<usize> {
        let mut conn = self.conn.clone();
        let key = instance_key(id);
        let path = json_path(path);
        let body = serde_json::to_string(&value)?;

        let lengths: Vec<Option<i64>> = self
            .call("append_to_array", async move {
                redis::cmd("JSON.ARRAPPEND")
                    .arg(&key)
                    .arg(&path)
                    .arg(body)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(first(lengths, "JSON.ARRAPPEND")? as usize)
    }

    async fn remove_from_array_at_index(&self, id: &str, path: &str, index: usize) -> Result<Value> {
        let mut conn = self.conn.clone();
        let key = instance_key(id);
        let path = json_path(path);

        let mut invocation = self.pop_script.key(key);
        invocation.arg(&path).arg(index);

        let popped: RedisResult<String> = match tokio::time::timeout(
            self.config.timeout,
            invocation.invoke_async(&mut conn),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                return Err(Error::StoreTimeout {
                    operation: "remove_from_array_at_index",
                    timeout: self.config.timeout,
                })
            }
        };

        let raw = popped.map_err(|e| pop_script_error(e, id, &path, index))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Protocol(format!("popped value is not JSON: {}", e)))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = instance_key(id);
        let removed: i64 = self
            .call("delete", async move {
                redis::cmd("JSON.DEL").arg(&key).query_async(&mut conn).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn apply(&self, id: &str, update: &InstanceUpdate, now: i64) -> Result<UpdateOutcome> {
        let mut conn = self.conn.clone();
        let key = instance_key(id);
        let raw_player = update.player_id().unwrap_or_default().to_string();
        let player = serde_json::to_string(&raw_player)?;
        let marker = serde_json::to_string(&BlockedPlayer {
            player_id: raw_player.clone(),
            blocked_at: now,
        })?;

        let mut invocation = self.update_script.key(key);
        invocation
            .arg(update.op())
            .arg(player)
            .arg(now)
            .arg(raw_player)
            .arg(marker);

        let result: RedisResult<Vec<i64>> = match tokio::time::timeout(
            self.config.timeout,
            invocation.invoke_async(&mut conn),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                return Err(Error::StoreTimeout {
                    operation: "apply",
                    timeout: self.config.timeout,
                })
            }
        };

        let reply = result.map_err(|e| map_script_error(e, id, update))?;
        match reply.as_slice() {
            [total, over, last_ping] => Ok(UpdateOutcome {
                total: u32::try_from(*total)
                    .map_err(|_| Error::Protocol(format!("negative player count {}", total)))?,
                over_capacity: *over != 0,
                last_ping: *last_ping,
            }),
            other => Err(Error::Protocol(format!(
                "update script returned {} values, expected 3",
                other.len()
            ))),
        }
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<WorldInstance>> {
        let mut conn = self.conn.clone();
        let index = self.config.index_name.clone();
        let limit = self.config.search_limit;
        let rendered = query.to_query_string();
        let q = rendered.clone();

        let value: redis::Value = self
            .call("search", async move {
                redis::cmd("FT.SEARCH")
                    .arg(&index)
                    .arg(&q)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(limit)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        SearchReply::decode(&value, limit, &rendered)?.into_instances()
    }

    async fn ensure_index(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let cmd = self.index_schema();
        let result: Result<()> = self
            .call("ensure_index", async move { cmd.query_async::<_, ()>(&mut conn).await })
            .await;

        match result {
            Ok(()) => {
                info!("Created search index {}", self.config.index_name);
                Ok(())
            }
            Err(Error::Store(e)) if e.to_string().contains("Index already exists") => {
                debug!("Search index {} already exists", self.config.index_name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .call("ping", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("lastPing"), "$.lastPing");
        assert_eq!(json_path(".players"), "$.players");
        assert_eq!(json_path("$.playerCount.total"), "$.playerCount.total");
    }

    #[test]
    fn test_default_config() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.index_name, "instanceIdx");
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_first_of_multi_reply() {
        assert_eq!(first(vec![Some(3i64)], "x").unwrap(), 3);
        assert!(matches!(
            first::<i64>(vec![None], "x"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(first::<i64>(vec![], "x"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_script_error_mapping() {
        let update = InstanceUpdate::Leave("usr_a".into());
        assert!(matches!(
            script_error(Some("NOTMEMBER"), "wrld_a:1", &update),
            Some(Error::NotAMember { player_id, .. }) if player_id == "usr_a"
        ));
        assert!(script_error(Some("NOTFOUND"), "wrld_a:1", &update)
            .unwrap()
            .is_not_found());
        assert!(matches!(
            script_error(Some("BLOCKED"), "wrld_a:1", &InstanceUpdate::Join("usr_b".into())),
            Some(Error::PlayerBlocked { .. })
        ));
        assert!(script_error(Some("ERR"), "wrld_a:1", &update).is_none());
        assert!(script_error(None, "wrld_a:1", &update).is_none());
    }

    #[test]
    fn test_update_script_covers_ops() {
        for op in ["join", "leave", "block"] {
            assert!(UPDATE_SCRIPT.contains(&format!("op == '{}'", op)));
        }
        assert_eq!(InstanceUpdate::Ping.op(), "ping");
        assert_eq!(InstanceUpdate::Block("usr_a".into()).op(), "block");
    }

    #[test]
    fn test_pop_error_mapping() {
        assert!(matches!(
            pop_error(Some("OUTOFRANGE"), "wrld_a:1", "$.players", 5),
            Some(Error::Protocol(msg)) if msg.contains("index 5")
        ));
        assert!(pop_error(Some("NOTFOUND"), "wrld_a:1", "$.players", 0)
            .unwrap()
            .is_not_found());
        assert!(matches!(
            pop_error(Some("NOTARRAY"), "wrld_a:1", "$.capacity", 0),
            Some(Error::Protocol(_))
        ));
        assert!(pop_error(Some("ERR"), "wrld_a:1", "$.players", 0).is_none());
    }
}
