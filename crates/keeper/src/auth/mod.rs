//! Credential handling.
//!
//! - `token` - rate-limited per-container secrets stored in the tree
//! - `peer` - deterministic password shared by ensemble members

mod peer;
mod token;

pub use peer::{
    CanonicalPropertySet, DigestAlgorithm, PeerPasswordDeriver, PeerPasswordInput, is_excluded,
};
pub use token::{
    Clock, ManualClock, RateLimiter, SystemClock, TokenConfig, TokenIssuer, container_login,
    generate_password, is_container_login,
};
