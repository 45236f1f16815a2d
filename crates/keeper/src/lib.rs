//! # Keeper - Ensemble coordination utilities
//!
//! Shared-configuration plumbing on top of a hierarchical coordination store:
//! safe node reads and writes, tree copy and delete, property blobs, value
//! lists, reference substitution, and credential issuance.
//!
//! ## Layout
//! ```text
//! auth / substitution / props / values / tree
//!                     ↓
//!                 nodes, paths
//!                     ↓
//!     CoordinationClient (MemoryStore | RedisClient)
//! ```

pub mod auth;
pub mod client;
pub mod nodes;
pub mod paths;
pub mod props;
pub mod substitution;
pub mod tree;
pub mod values;

pub use auth::{PeerPasswordDeriver, TokenIssuer};
pub use client::{CoordinationClient, MemoryClient, MemoryStore, NodeWatch, RedisClient};
pub use substitution::SubstitutionResolver;
