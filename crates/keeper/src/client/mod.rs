//! Coordination store client interface and backends.
//!
//! Implements:
//! - The `CoordinationClient` trait consumed by every higher-level operation
//! - An in-process backend (`MemoryStore`) with sessions and watches
//! - A Redis backend (`RedisClient`) mapping the node tree onto hashes and sets

mod memory;
mod redis_store;

pub use memory::{MemoryClient, MemoryStore};
pub use redis_store::{RedisClient, RedisStoreConfig};

use async_trait::async_trait;
use ensemble_common::{CreateMode, NodeStat, Result, WatchedEvent};
use tokio::sync::oneshot;

/// Minimum surface of a hierarchical coordination store.
///
/// Missing nodes surface as `CoordError::NoNode`, concurrent creation as
/// `NodeExists`, and deleting a node with children as `NotEmpty`. Callers in
/// this crate absorb those races; availability errors are passed through.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Metadata for `path`, `None` if the node does not exist
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>>;

    /// Payload of `path`; `None` when the node carries no data
    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Payload of `path` plus a one-shot watch on its next change.
    ///
    /// A missing node yields `None` data and a watch that fires on creation.
    async fn get_data_watch(&self, path: &str) -> Result<(Option<Vec<u8>>, NodeWatch)>;

    /// Overwrite the payload of an existing node
    async fn set_data(&self, path: &str, data: Option<&[u8]>) -> Result<()>;

    /// Create a node, optionally creating missing persistent parents
    async fn create(
        &self,
        path: &str,
        data: Option<&[u8]>,
        mode: CreateMode,
        create_parents: bool,
    ) -> Result<String>;

    /// Names of the direct children of `path`
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Delete a childless node
    async fn delete(&self, path: &str) -> Result<()>;
}

/// One-shot change notification handle
#[derive(Debug)]
pub struct NodeWatch {
    path: String,
    rx: oneshot::Receiver<WatchedEvent>,
}

impl NodeWatch {
    pub(crate) fn new(path: impl Into<String>) -> (oneshot::Sender<WatchedEvent>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                path: path.into(),
                rx,
            },
        )
    }

    /// Path this watch was registered on
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the change; `None` if the backend went away first
    pub async fn changed(self) -> Option<WatchedEvent> {
        self.rx.await.ok()
    }

    /// Non-blocking check for an already delivered event
    pub fn try_changed(&mut self) -> Option<WatchedEvent> {
        self.rx.try_recv().ok()
    }
}
