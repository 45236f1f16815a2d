//! Configuration management for Keeper.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use ensemble_common::constants::{
    DEFAULT_KEY_PREFIX, DEFAULT_REDIS_URL, DEFAULT_SECRET_LENGTH, DEFAULT_TOKEN_RATE_LIMIT_SECS,
    DEFAULT_TOKEN_ROOT, peer::DEFAULT_DIGEST,
};
use keeper::auth::TokenConfig;
use keeper::client::RedisStoreConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeeperConfig {
    /// Coordination store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Container token issuance
    #[serde(default)]
    pub tokens: TokensConfig,

    /// Peer password derivation
    #[serde(default)]
    pub peer: PeerConfig,
}

/// Which coordination store backs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redis,
    /// Process-local tree, discarded on exit
    Memory,
}

/// Store-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every Redis key owned by the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl StoreConfig {
    pub fn redis(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
        }
    }
}

/// Token issuance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    /// Node under which secrets are stored
    #[serde(default = "default_token_root")]
    pub root: String,

    /// Minimum seconds between regenerations
    #[serde(default = "default_rate_limit")]
    pub rate_limit_secs: u64,

    /// Generated secret length
    #[serde(default = "default_secret_length")]
    pub secret_length: usize,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            root: default_token_root(),
            rate_limit_secs: default_rate_limit(),
            secret_length: default_secret_length(),
        }
    }
}

impl From<&TokensConfig> for TokenConfig {
    fn from(cfg: &TokensConfig) -> Self {
        Self {
            root: cfg.root.clone(),
            rate_limit: Duration::from_secs(cfg.rate_limit_secs),
            secret_length: cfg.secret_length,
        }
    }
}

/// Peer password configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Digest name (`SHA`, `SHA-256`)
    #[serde(default = "default_digest")]
    pub digest: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            digest: default_digest(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_key_prefix() -> String { DEFAULT_KEY_PREFIX.to_string() }
fn default_token_root() -> String { DEFAULT_TOKEN_ROOT.to_string() }
fn default_rate_limit() -> u64 { DEFAULT_TOKEN_RATE_LIMIT_SECS }
fn default_secret_length() -> usize { DEFAULT_SECRET_LENGTH }
fn default_digest() -> String { DEFAULT_DIGEST.to_string() }

impl KeeperConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            Self::from_file(config_path)?
        } else {
            tracing::warn!(path = config_path, "Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.store.redis_url = redis_url.clone();
        }
        if let Some(backend) = args.backend {
            config.store.backend = backend;
        }

        Ok(config)
    }

    fn from_file(config_path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
            .context("Failed to load config file")?;

        settings
            .try_deserialize()
            .context("Failed to parse config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KeeperConfig::default();
        assert_eq!(config.store.backend, Backend::Redis);
        assert_eq!(config.store.key_prefix, "ensemble:");
        assert_eq!(config.tokens.rate_limit_secs, 60);
        assert_eq!(config.peer.digest, "SHA");

        let tokens = TokenConfig::from(&config.tokens);
        assert_eq!(tokens.rate_limit, Duration::from_secs(60));
        assert_eq!(tokens.root, "/fabric/authentication/containers");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = std::env::temp_dir().join(format!("keeper-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[store]\nbackend = \"memory\"\n\n[tokens]\nsecret_length = 24\n",
        )
        .unwrap();

        let config = KeeperConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.store.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.tokens.secret_length, 24);
        assert_eq!(config.tokens.root, DEFAULT_TOKEN_ROOT);
        assert_eq!(config.peer.digest, DEFAULT_DIGEST);
    }
}
