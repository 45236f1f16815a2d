//! Redis-backed coordination store.
//!
//! Layout (all keys carry the configured prefix):
//! ```text
//! node:{path}      HASH  data, ephemeral_owner, ctime, mtime, version
//! children:{path}  SET   child names
//! session:{id}     SET   ephemeral paths owned by a session
//! watch:{path}     pub/sub channel announcing changes
//! ```
//! The root node is implicit. Create, set and delete run as Lua scripts so
//! the existence/emptiness checks and the mutation are atomic.

use async_trait::async_trait;
use ensemble_common::constants::{
    DEFAULT_KEY_PREFIX, DEFAULT_REDIS_URL, ROOT_PATH,
    redis_keys::{CHILDREN_PREFIX, NODE_PREFIX, SESSION_PREFIX, WATCH_PREFIX},
};
use ensemble_common::{CoordError, CreateMode, NodeStat, Result, WatchedEvent};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use std::collections::HashMap;

use super::{CoordinationClient, NodeWatch};
use crate::paths;

const CREATE_SCRIPT: &str = r"
if ARGV[6] ~= '1' then
  if redis.call('EXISTS', KEYS[2]) == 0 then return 'NONODE' end
  local parent_owner = redis.call('HGET', KEYS[2], 'ephemeral_owner')
  if parent_owner and parent_owner ~= '0' then return 'EPHEMERAL_PARENT' end
end
if redis.call('EXISTS', KEYS[1]) == 1 then return 'NODEEXISTS' end
redis.call('HSET', KEYS[1], 'ephemeral_owner', ARGV[4], 'ctime', ARGV[5], 'mtime', ARGV[5], 'version', 0)
if ARGV[2] == '1' then redis.call('HSET', KEYS[1], 'data', ARGV[3]) end
redis.call('SADD', KEYS[3], ARGV[1])
if ARGV[4] ~= '0' then redis.call('SADD', KEYS[4], ARGV[9]) end
redis.call('PUBLISH', ARGV[7], 'created')
redis.call('PUBLISH', ARGV[8], 'children_changed')
return 'OK'
";

const SET_DATA_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 'NONODE' end
if ARGV[1] == '1' then
  redis.call('HSET', KEYS[1], 'data', ARGV[2])
else
  redis.call('HDEL', KEYS[1], 'data')
end
redis.call('HSET', KEYS[1], 'mtime', ARGV[3])
redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('PUBLISH', ARGV[4], 'data_changed')
return 'OK'
";

// KEYS[4] is the session set of the owner the caller read beforehand; a
// changed owner means the node was recreated, so the caller re-reads.
const DELETE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 'NONODE' end
if redis.call('SCARD', KEYS[2]) > 0 then return 'NOTEMPTY' end
local owner = redis.call('HGET', KEYS[1], 'ephemeral_owner') or '0'
if owner ~= ARGV[2] then return 'OWNER_CHANGED' end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[3], ARGV[1])
if owner ~= '0' then redis.call('SREM', KEYS[4], ARGV[3]) end
redis.call('PUBLISH', ARGV[4], 'deleted')
redis.call('PUBLISH', ARGV[5], 'children_changed')
return 'OK'
";

/// Redis backend configuration
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix for every key and channel owned by the store
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// A client session on the Redis-backed store
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    /// Connection manager (auto-reconnecting)
    conn: ConnectionManager,
    prefix: String,
    session_id: u64,
    create_script: Script,
    set_data_script: Script,
    delete_script: Script,
}

impl RedisClient {
    /// Connect and open a new session
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| map_redis_error(e, "Failed to create Redis client"))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| map_redis_error(e, "Failed to connect to Redis"))?;

        let session_id = loop {
            let id = rand::random::<u64>();
            if id != 0 {
                break id;
            }
        };

        tracing::debug!(url = %config.url, session = session_id, "Redis store session opened");

        Ok(Self {
            client,
            conn,
            prefix: config.key_prefix.clone(),
            session_id,
            create_script: Script::new(CREATE_SCRIPT),
            set_data_script: Script::new(SET_DATA_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    /// Session id stamped on ephemeral nodes created through this client
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// End the session, removing every ephemeral node it owns
    pub async fn close(self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let owned: Vec<String> = conn
            .smembers(self.session_key(self.session_id))
            .await
            .map_err(|e| map_redis_error(e, "Failed to list session nodes"))?;

        let mut removed = 0;
        for path in owned {
            match self.delete(&path).await {
                Ok(()) => removed += 1,
                Err(CoordError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(session = self.session_id, removed, "Redis store session closed");
        Ok(removed)
    }

    fn node_key(&self, path: &str) -> String {
        format!("{}{}{}", self.prefix, NODE_PREFIX, path)
    }

    fn children_key(&self, path: &str) -> String {
        format!("{}{}{}", self.prefix, CHILDREN_PREFIX, path)
    }

    fn session_key(&self, session_id: u64) -> String {
        format!("{}{}{}", self.prefix, SESSION_PREFIX, session_id)
    }

    fn watch_channel(&self, path: &str) -> String {
        format!("{}{}{}", self.prefix, WATCH_PREFIX, path)
    }

    async fn create_one(&self, path: &str, data: Option<&[u8]>, owner: u64) -> Result<()> {
        let parent = paths::parent(path)?;
        let mut conn = self.conn.clone();
        let status: String = self
            .create_script
            .key(self.node_key(path))
            .key(self.node_key(&parent))
            .key(self.children_key(&parent))
            .key(self.session_key(owner))
            .arg(paths::name(path))
            .arg(if data.is_some() { "1" } else { "0" })
            .arg(data.unwrap_or_default())
            .arg(owner)
            .arg(chrono::Utc::now().timestamp_millis())
            .arg(if parent == ROOT_PATH { "1" } else { "0" })
            .arg(self.watch_channel(path))
            .arg(self.watch_channel(&parent))
            .arg(path)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, format!("Failed to create {path}")))?;

        match status.as_str() {
            "OK" => Ok(()),
            "NONODE" => Err(CoordError::NoNode(parent)),
            "NODEEXISTS" => Err(CoordError::NodeExists(path.to_string())),
            "EPHEMERAL_PARENT" => Err(CoordError::operation(format!(
                "Ephemeral node {parent} cannot have children"
            ))),
            other => Err(CoordError::operation(format!(
                "Unexpected create status for {path}: {other}"
            ))),
        }
    }
}

#[async_trait]
impl CoordinationClient for RedisClient {
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        let mut conn = self.conn.clone();
        let (fields, num_children): (HashMap<String, Vec<u8>>, u32) = redis::pipe()
            .hgetall(self.node_key(path))
            .scard(self.children_key(path))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, format!("Failed to stat {path}")))?;

        if path == ROOT_PATH {
            return Ok(Some(NodeStat {
                num_children,
                ..Default::default()
            }));
        }
        Ok(parse_stat(&fields, num_children))
    }

    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if path == ROOT_PATH {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let key = self.node_key(path);
        let (exists, data): (bool, Option<Vec<u8>>) = redis::pipe()
            .exists(&key)
            .hget(&key, "data")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, format!("Failed to read {path}")))?;

        if !exists {
            return Err(CoordError::NoNode(path.to_string()));
        }
        Ok(data)
    }

    async fn get_data_watch(&self, path: &str) -> Result<(Option<Vec<u8>>, NodeWatch)> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| map_redis_error(e, "Failed to open watch connection"))?;
        pubsub
            .subscribe(self.watch_channel(path))
            .await
            .map_err(|e| map_redis_error(e, format!("Failed to watch {path}")))?;

        // Subscribed before reading, so no change can slip in between.
        let data = match self.get_data(path).await {
            Ok(data) => data,
            Err(CoordError::NoNode(_)) => None,
            Err(e) => return Err(e),
        };

        let (mut tx, watch) = NodeWatch::new(path);
        let watched = path.to_string();
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            let msg = tokio::select! {
                msg = messages.next() => msg,
                _ = tx.closed() => return,
            };

            let event = msg
                .and_then(|m| m.get_payload::<String>().ok())
                .and_then(|payload| WatchedEvent::parse(&payload));
            match event {
                Some(event) => {
                    let _ = tx.send(event);
                }
                None => tracing::warn!(path = %watched, "Watch ended without a usable event"),
            }
        });

        Ok((data, watch))
    }

    async fn set_data(&self, path: &str, data: Option<&[u8]>) -> Result<()> {
        if path == ROOT_PATH {
            return Err(CoordError::InvalidArgument(
                "The root node carries no data".to_string(),
            ));
        }
        let mut conn = self.conn.clone();
        let status: String = self
            .set_data_script
            .key(self.node_key(path))
            .arg(if data.is_some() { "1" } else { "0" })
            .arg(data.unwrap_or_default())
            .arg(chrono::Utc::now().timestamp_millis())
            .arg(self.watch_channel(path))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, format!("Failed to write {path}")))?;

        match status.as_str() {
            "OK" => Ok(()),
            "NONODE" => Err(CoordError::NoNode(path.to_string())),
            other => Err(CoordError::operation(format!(
                "Unexpected set status for {path}: {other}"
            ))),
        }
    }

    async fn create(
        &self,
        path: &str,
        data: Option<&[u8]>,
        mode: CreateMode,
        create_parents: bool,
    ) -> Result<String> {
        paths::validate(path)?;
        if path == ROOT_PATH {
            return Err(CoordError::NodeExists(path.to_string()));
        }

        if create_parents {
            for ancestor in paths::ancestors(path) {
                match self.create_one(&ancestor, None, 0).await {
                    Ok(()) | Err(CoordError::NodeExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let owner = match mode {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => self.session_id,
        };
        self.create_one(path, data, owner).await?;
        Ok(path.to_string())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let (exists, mut names): (bool, Vec<String>) = redis::pipe()
            .exists(self.node_key(path))
            .smembers(self.children_key(path))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, format!("Failed to list {path}")))?;

        if !exists && path != ROOT_PATH {
            return Err(CoordError::NoNode(path.to_string()));
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if path == ROOT_PATH {
            return Err(CoordError::InvalidArgument(
                "The root node cannot be deleted".to_string(),
            ));
        }
        let parent = paths::parent(path)?;
        let mut conn = self.conn.clone();

        loop {
            let owner: Option<String> = conn
                .hget(self.node_key(path), "ephemeral_owner")
                .await
                .map_err(|e| map_redis_error(e, format!("Failed to stat {path}")))?;
            let owner = parse_owner(owner.as_deref());

            let status: String = self
                .delete_script
                .key(self.node_key(path))
                .key(self.children_key(path))
                .key(self.children_key(&parent))
                .key(self.session_key(owner))
                .arg(paths::name(path))
                .arg(owner)
                .arg(path)
                .arg(self.watch_channel(path))
                .arg(self.watch_channel(&parent))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(e, format!("Failed to delete {path}")))?;

            match status.as_str() {
                "OK" => return Ok(()),
                "NONODE" => return Err(CoordError::NoNode(path.to_string())),
                "NOTEMPTY" => return Err(CoordError::NotEmpty(path.to_string())),
                "OWNER_CHANGED" => {
                    tracing::debug!(path, "Node recreated during delete, retrying");
                }
                other => {
                    return Err(CoordError::operation(format!(
                        "Unexpected delete status for {path}: {other}"
                    )));
                }
            }
        }
    }
}

/// Session id stored in a node's `ephemeral_owner` field, 0 when absent or persistent
fn parse_owner(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Build a stat from a node hash; an empty hash means the node is absent
fn parse_stat(fields: &HashMap<String, Vec<u8>>, num_children: u32) -> Option<NodeStat> {
    if fields.is_empty() {
        return None;
    }

    fn number<T: std::str::FromStr + Default>(fields: &HashMap<String, Vec<u8>>, name: &str) -> T {
        fields
            .get(name)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    Some(NodeStat {
        ephemeral_owner: number(fields, "ephemeral_owner"),
        ctime: number(fields, "ctime"),
        mtime: number(fields, "mtime"),
        version: number(fields, "version"),
        num_children,
        data_length: fields.get("data").map_or(0, |d| d.len() as u32),
    })
}

/// Translate a Redis failure into the coordination error kinds
fn map_redis_error(err: RedisError, context: impl Into<String>) -> CoordError {
    let context = context.into();
    let unavailable = matches!(
        err.kind(),
        ErrorKind::ReadOnly | ErrorKind::MasterDown | ErrorKind::ClusterDown
    ) || err.is_connection_refusal()
        || err.is_connection_dropped();

    if unavailable {
        CoordError::StoreUnavailable(format!("{context}: {err}"))
    } else if err.is_timeout() {
        CoordError::Timeout(format!("{context}: {err}"))
    } else {
        CoordError::StoreOperationFailed {
            context,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_parse_stat_missing_node() {
        assert!(parse_stat(&HashMap::new(), 0).is_none());
    }

    #[test]
    fn test_parse_stat_fields() {
        let stat = parse_stat(
            &fields(&[
                ("ephemeral_owner", "42"),
                ("ctime", "1000"),
                ("mtime", "2000"),
                ("version", "3"),
                ("data", "hello"),
            ]),
            2,
        )
        .unwrap();

        assert_eq!(stat.ephemeral_owner, 42);
        assert_eq!(stat.ctime, 1000);
        assert_eq!(stat.mtime, 2000);
        assert_eq!(stat.version, 3);
        assert_eq!(stat.num_children, 2);
        assert_eq!(stat.data_length, 5);
        assert!(stat.is_ephemeral());
    }

    #[test]
    fn test_read_only_maps_to_unavailable() {
        let err = RedisError::from((ErrorKind::ReadOnly, "READONLY", "replica".to_string()));
        assert!(matches!(
            map_redis_error(err, "write"),
            CoordError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_other_errors_are_wrapped() {
        let err = RedisError::from((ErrorKind::TypeError, "WRONGTYPE"));
        assert!(matches!(
            map_redis_error(err, "read"),
            CoordError::StoreOperationFailed { .. }
        ));
    }

    #[test]
    fn test_parse_owner() {
        assert_eq!(parse_owner(Some("42")), 42);
        assert_eq!(parse_owner(Some("0")), 0);
        assert_eq!(parse_owner(None), 0);
        assert_eq!(parse_owner(Some("garbage")), 0);
    }

    #[test]
    fn test_scripts_only_touch_declared_keys() {
        // Keys derived inside Lua are invisible to cluster slot routing.
        for script in [CREATE_SCRIPT, SET_DATA_SCRIPT, DELETE_SCRIPT] {
            assert!(!script.contains(".."), "script builds a key: {script}");
        }
        assert!(DELETE_SCRIPT.contains("SREM', KEYS[4]"));
    }
}
