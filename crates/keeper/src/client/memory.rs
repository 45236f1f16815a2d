//! In-process coordination store.
//!
//! Holds the whole node tree behind a single async mutex. Every handle
//! obtained from [`MemoryStore::session`] is a separate client session, so
//! ephemeral nodes created through it disappear when the handle is closed.

use async_trait::async_trait;
use ensemble_common::constants::ROOT_PATH;
use ensemble_common::{CoordError, CreateMode, NodeStat, Result, WatchedEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, oneshot};

use super::{CoordinationClient, NodeWatch};
use crate::paths;

#[derive(Debug, Clone)]
struct Node {
    data: Option<Vec<u8>>,
    ephemeral_owner: u64,
    ctime: i64,
    mtime: i64,
    version: u32,
    children: BTreeSet<String>,
}

impl Node {
    fn new(data: Option<Vec<u8>>, ephemeral_owner: u64, now: i64) -> Self {
        Self {
            data,
            ephemeral_owner,
            ctime: now,
            mtime: now,
            version: 0,
            children: BTreeSet::new(),
        }
    }

    fn stat(&self) -> NodeStat {
        NodeStat {
            ephemeral_owner: self.ephemeral_owner,
            ctime: self.ctime,
            mtime: self.mtime,
            version: self.version,
            num_children: self.children.len() as u32,
            data_length: self.data.as_ref().map_or(0, |d| d.len() as u32),
        }
    }
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    watches: HashMap<String, Vec<oneshot::Sender<WatchedEvent>>>,
    /// Last handed-out timestamp; keeps mtimes strictly increasing
    clock: i64,
}

impl Inner {
    fn tick(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn fire(&mut self, path: &str, event: WatchedEvent) {
        if let Some(senders) = self.watches.remove(path) {
            for tx in senders {
                let _ = tx.send(event);
            }
        }
    }

    fn insert(&mut self, path: &str, data: Option<Vec<u8>>, owner: u64) -> Result<()> {
        let parent = paths::parent(path)?;
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or_else(|| CoordError::NoNode(parent.clone()))?;
        if parent_node.ephemeral_owner != 0 {
            return Err(CoordError::operation(format!(
                "Ephemeral node {parent} cannot have children"
            )));
        }
        if self.nodes.contains_key(path) {
            return Err(CoordError::NodeExists(path.to_string()));
        }

        let now = self.tick();
        self.nodes
            .insert(path.to_string(), Node::new(data, owner, now));
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(paths::name(path).to_string());
        }

        self.fire(path, WatchedEvent::NodeCreated);
        self.fire(&parent, WatchedEvent::NodeChildrenChanged);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(CoordError::NotEmpty(path.to_string()));
        }

        let parent = paths::parent(path)?;
        self.nodes.remove(path);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.remove(paths::name(path));
        }

        self.fire(path, WatchedEvent::NodeDeleted);
        self.fire(&parent, WatchedEvent::NodeChildrenChanged);
        Ok(())
    }
}

/// Shared in-process node tree
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    next_session: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty store holding only the root node
    pub fn new() -> Self {
        let mut inner = Inner::default();
        let now = inner.tick();
        inner
            .nodes
            .insert(ROOT_PATH.to_string(), Node::new(None, 0, now));

        Self {
            inner: Arc::new(Mutex::new(inner)),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a new client session against this store
    pub fn session(&self) -> MemoryClient {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        MemoryClient {
            store: self.clone(),
            session_id,
        }
    }

    /// Number of nodes, root included
    pub async fn len(&self) -> usize {
        self.inner.lock().await.nodes.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A session on a [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryClient {
    store: MemoryStore,
    session_id: u64,
}

impl MemoryClient {
    /// Session id stamped on ephemeral nodes created through this handle
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The store this session belongs to
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// End the session, removing every ephemeral node it owns
    pub async fn close(self) -> usize {
        let mut inner = self.store.inner.lock().await;
        let owned: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == self.session_id)
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed = 0;
        for path in owned {
            if inner.remove(&path).is_ok() {
                removed += 1;
            }
        }

        tracing::debug!(session = self.session_id, removed, "Memory session closed");
        removed
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        let inner = self.store.inner.lock().await;
        Ok(inner.nodes.get(path).map(Node::stat))
    }

    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.store.inner.lock().await;
        inner
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    async fn get_data_watch(&self, path: &str) -> Result<(Option<Vec<u8>>, NodeWatch)> {
        let mut inner = self.store.inner.lock().await;
        let data = inner.nodes.get(path).and_then(|node| node.data.clone());
        let (tx, watch) = NodeWatch::new(path);
        let senders = inner.watches.entry(path.to_string()).or_default();
        senders.retain(|tx| !tx.is_closed());
        senders.push(tx);
        Ok((data, watch))
    }

    async fn set_data(&self, path: &str, data: Option<&[u8]>) -> Result<()> {
        let mut inner = self.store.inner.lock().await;
        let now = inner.tick();
        let node = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        node.data = data.map(<[u8]>::to_vec);
        node.mtime = now;
        node.version += 1;
        inner.fire(path, WatchedEvent::NodeDataChanged);
        Ok(())
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

        let mut inner = self.store.inner.lock().await;
        if create_parents {
            for ancestor in paths::ancestors(path) {
                if !inner.nodes.contains_key(&ancestor) {
                    inner.insert(&ancestor, None, 0)?;
                }
            }
        }

        let owner = match mode {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => self.session_id,
        };
        inner.insert(path, data.map(<[u8]>::to_vec), owner)?;
        Ok(path.to_string())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let inner = self.store.inner.lock().await;
        inner
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if path == ROOT_PATH {
            return Err(CoordError::InvalidArgument(
                "The root node cannot be deleted".to_string(),
            ));
        }
        let mut inner = self.store.inner.lock().await;
        inner.remove(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_requires_parent() {
        let client = MemoryStore::new().session();
        let err = client
            .create("/a/b", None, CreateMode::Persistent, false)
            .await
            .unwrap_err();
        assert!(err.is_no_node());

        client
            .create("/a/b", Some(b"x"), CreateMode::Persistent, true)
            .await
            .unwrap();
        assert_eq!(client.children("/a").await.unwrap(), vec!["b"]);
        assert_eq!(client.get_data("/a/b").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let client = MemoryStore::new().session();
        client
            .create("/a", None, CreateMode::Persistent, false)
            .await
            .unwrap();
        let err = client
            .create("/a", None, CreateMode::Persistent, false)
            .await
            .unwrap_err();
        assert!(err.is_node_exists());
    }

    #[tokio::test]
    async fn test_delete_non_empty_fails() {
        let client = MemoryStore::new().session();
        client
            .create("/a/b", None, CreateMode::Persistent, true)
            .await
            .unwrap();
        assert!(client.delete("/a").await.unwrap_err().is_not_empty());
        client.delete("/a/b").await.unwrap();
        client.delete("/a").await.unwrap();
        assert!(client.exists("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ephemeral_removed_on_close() {
        let store = MemoryStore::new();
        let owner = store.session();
        let observer = store.session();
        owner
            .create("/live/node-1", None, CreateMode::Ephemeral, true)
            .await
            .unwrap();

        let stat = observer.exists("/live/node-1").await.unwrap().unwrap();
        assert_eq!(stat.ephemeral_owner, owner.session_id());

        assert_eq!(owner.close().await, 1);
        assert!(observer.exists("/live/node-1").await.unwrap().is_none());
        assert!(observer.exists("/live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_data_bumps_version_and_mtime() {
        let client = MemoryStore::new().session();
        client
            .create("/a", Some(b"1"), CreateMode::Persistent, false)
            .await
            .unwrap();
        let before = client.exists("/a").await.unwrap().unwrap();
        client.set_data("/a", Some(b"2")).await.unwrap();
        let after = client.exists("/a").await.unwrap().unwrap();
        assert_eq!(after.version, before.version + 1);
        assert!(after.mtime > before.mtime);
    }

    #[tokio::test]
    async fn test_watch_fires_once_on_change() {
        let client = MemoryStore::new().session();
        client
            .create("/w", Some(b"old"), CreateMode::Persistent, false)
            .await
            .unwrap();

        let (data, watch) = client.get_data_watch("/w").await.unwrap();
        assert_eq!(data, Some(b"old".to_vec()));

        client.set_data("/w", Some(b"new")).await.unwrap();
        assert_eq!(watch.changed().await, Some(WatchedEvent::NodeDataChanged));
    }

    #[tokio::test]
    async fn test_watch_on_missing_node_fires_on_create() {
        let client = MemoryStore::new().session();
        let (data, mut watch) = client.get_data_watch("/later").await.unwrap();
        assert!(data.is_none());
        assert!(watch.try_changed().is_none());

        client
            .create("/later", None, CreateMode::Persistent, false)
            .await
            .unwrap();
        assert_eq!(watch.changed().await, Some(WatchedEvent::NodeCreated));
    }

    #[tokio::test]
    async fn test_dropped_watches_are_pruned() {
        let client = MemoryStore::new().session();
        for _ in 0..5 {
            let (_, watch) = client.get_data_watch("/quiet").await.unwrap();
            drop(watch);
        }
        let (_, _live) = client.get_data_watch("/quiet").await.unwrap();

        let inner = client.store().inner.lock().await;
        assert_eq!(inner.watches.get("/quiet").map(Vec::len), Some(1));
    }
}
