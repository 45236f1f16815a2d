//! Shared constants for Ensemble components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default prefix prepended to every Redis key owned by the store
pub const DEFAULT_KEY_PREFIX: &str = "ensemble:";

/// Root path of the node tree
pub const ROOT_PATH: &str = "/";

/// Node under which per-identity authentication secrets live
pub const DEFAULT_TOKEN_ROOT: &str = "/fabric/authentication/containers";

/// Minimum interval between two token regenerations by one process (1 minute)
pub const DEFAULT_TOKEN_RATE_LIMIT_SECS: u64 = 60;

/// Length of a generated secret
pub const DEFAULT_SECRET_LENGTH: usize = 16;

/// Login prefix distinguishing container-originated logins
pub const CONTAINER_LOGIN_PREFIX: &str = "container#";

/// Scheme recognised by the substitution resolver
pub const DEFAULT_REFERENCE_SCHEME: &str = "zk";

/// Peer password derivation settings
pub mod peer {
    /// Marker fed into the digest ahead of the peer id
    pub const PEER_ID_MARKER: &str = "server.id";

    /// Default digest name (SHA-1, matching already deployed peers)
    pub const DEFAULT_DIGEST: &str = "SHA";

    /// Key prefixes dropped before canonicalization
    pub const EXCLUDED_KEY_PREFIXES: &[&str] = &["clientPort"];

    /// Keys dropped before canonicalization
    pub const EXCLUDED_KEYS: &[&str] = &[
        "component.id",
        "server.id",
        "dataDir",
        "service.pid",
        "felix.fileinstall.filename",
    ];
}

/// Redis key layout
pub mod redis_keys {
    /// Node hash: node:{path}
    pub const NODE_PREFIX: &str = "node:";

    /// Child name set: children:{path}
    pub const CHILDREN_PREFIX: &str = "children:";

    /// Ephemeral paths owned by a session: session:{id}
    pub const SESSION_PREFIX: &str = "session:";

    /// Watch notification channel: watch:{path}
    pub const WATCH_PREFIX: &str = "watch:";
}
