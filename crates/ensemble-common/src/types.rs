//! Core types shared across Ensemble components.

use serde::{Deserialize, Serialize};

/// How a node is created in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateMode {
    /// Survives the creating session
    #[default]
    Persistent,
    /// Removed when the creating session ends; never replicated
    Ephemeral,
}

/// Metadata of a node in the coordination store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStat {
    /// Owning session id, 0 for persistent nodes
    pub ephemeral_owner: u64,

    /// Creation time (Unix epoch millis)
    pub ctime: i64,

    /// Last data modification time (Unix epoch millis)
    pub mtime: i64,

    /// Number of data writes since creation
    pub version: u32,

    /// Number of direct children
    pub num_children: u32,

    /// Payload length in bytes
    pub data_length: u32,
}

impl NodeStat {
    /// Returns true if the node is bound to a client session
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// One-shot change notification for a watched node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedEvent {
    NodeCreated,
    NodeDataChanged,
    NodeDeleted,
    NodeChildrenChanged,
}

impl WatchedEvent {
    /// Wire name used on notification channels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeCreated => "created",
            Self::NodeDataChanged => "data_changed",
            Self::NodeDeleted => "deleted",
            Self::NodeChildrenChanged => "children_changed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::NodeCreated),
            "data_changed" => Some(Self::NodeDataChanged),
            "deleted" => Some(Self::NodeDeleted),
            "children_changed" => Some(Self::NodeChildrenChanged),
            _ => None,
        }
    }
}

/// An issued authentication secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Identity the secret belongs to
    pub identity: String,

    /// The secret itself
    pub secret: String,

    /// Issuance time (Unix epoch millis)
    pub issued_at: i64,
}

/// Outcome of a tree copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    /// Destination paths created by this run
    pub created: Vec<String>,

    /// Source nodes skipped (ephemeral, already present, or vanished)
    pub skipped: u64,
}
