//! Rate-limited issuance of per-identity secrets.
//!
//! Secrets live as raw node data under a fixed root (`{root}/{identity}`).
//! The rate limit is process-local: another process, or this one after a
//! restart, may issue a fresh secret inside the same window.

use ensemble_common::constants::{
    CONTAINER_LOGIN_PREFIX, DEFAULT_SECRET_LENGTH, DEFAULT_TOKEN_RATE_LIMIT_SECS,
    DEFAULT_TOKEN_ROOT,
};
use ensemble_common::{AuthToken, CoordError, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::client::CoordinationClient;
use crate::nodes;
use crate::paths;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Source of the current time in Unix millis
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Remembers the last issuance and answers whether the window is still open
pub struct RateLimiter {
    window: Duration,
    clock: Arc<dyn Clock>,
    last_issued: Mutex<Option<i64>>,
}

impl RateLimiter {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            last_issued: Mutex::new(None),
        }
    }

    /// True if an issuance happened less than one window ago
    pub async fn within_window(&self) -> bool {
        let last = *self.last_issued.lock().await;
        match last {
            Some(at) => self.clock.now_millis() - at < self.window.as_millis() as i64,
            None => false,
        }
    }

    /// Record an issuance at the current time
    pub async fn record(&self) {
        *self.last_issued.lock().await = Some(self.clock.now_millis());
    }
}

/// Token issuer configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Node under which secrets are stored
    pub root: String,
    /// Minimum interval between regenerations
    pub rate_limit: Duration,
    /// Generated secret length
    pub secret_length: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_TOKEN_ROOT.to_string(),
            rate_limit: Duration::from_secs(DEFAULT_TOKEN_RATE_LIMIT_SECS),
            secret_length: DEFAULT_SECRET_LENGTH,
        }
    }
}

/// Issues and looks up per-identity secrets
pub struct TokenIssuer {
    config: TokenConfig,
    limiter: RateLimiter,
}

impl TokenIssuer {
    /// Issuer on the wall clock
    pub fn new(config: TokenConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Issuer with an injected clock
    pub fn with_clock(config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, clock);
        Self { config, limiter }
    }

    /// Path holding the secret of `identity`
    pub fn token_path(&self, identity: &str) -> String {
        paths::join(&self.config.root, identity)
    }

    /// Return a secret for `identity`, reusing the stored one inside the rate-limit window
    pub async fn generate_token(
        &self,
        client: &dyn CoordinationClient,
        identity: &str,
    ) -> Result<String> {
        if identity.is_empty() || identity.contains('/') {
            return Err(CoordError::InvalidArgument(format!(
                "Invalid token identity: {identity:?}"
            )));
        }

        self.issue(client, identity)
            .await
            .map_err(|e| e.wrap("Cannot generate container token"))
    }

    async fn issue(&self, client: &dyn CoordinationClient, identity: &str) -> Result<String> {
        let path = self.token_path(identity);

        if self.limiter.within_window().await {
            if let Some(secret) = nodes::get_string_data(client, &path).await? {
                if !secret.is_empty() {
                    tracing::debug!(identity, "Reusing token inside rate-limit window");
                    return Ok(secret);
                }
            }
        }

        let secret = generate_password(self.config.secret_length.max(1));
        nodes::set_data(client, &path, Some(secret.as_bytes())).await?;
        self.limiter.record().await;

        tracing::info!(identity, path = %path, "Issued new token");
        Ok(secret)
    }

    /// Stored token for `identity`, if any
    pub async fn read_token(
        &self,
        client: &dyn CoordinationClient,
        identity: &str,
    ) -> Result<Option<AuthToken>> {
        let path = self.token_path(identity);
        let Some(stat) = client.exists(&path).await? else {
            return Ok(None);
        };

        Ok(nodes::get_string_data(client, &path)
            .await?
            .filter(|secret| !secret.is_empty())
            .map(|secret| AuthToken {
                identity: identity.to_string(),
                secret,
                issued_at: stat.mtime,
            }))
    }

    /// Every stored secret keyed by container login
    pub async fn container_tokens(
        &self,
        client: &dyn CoordinationClient,
    ) -> Result<BTreeMap<String, String>> {
        let mut tokens = BTreeMap::new();
        for identity in nodes::children_safe(client, &self.config.root).await? {
            let path = self.token_path(&identity);
            if let Some(secret) = nodes::get_string_data(client, &path).await? {
                tokens.insert(container_login(&identity), secret);
            }
        }
        Ok(tokens)
    }
}

/// Random secret of `length` characters drawn uniformly from `[0-9A-Za-z]`
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Login name used by a container with the given runtime identity
pub fn container_login(runtime_id: &str) -> String {
    format!("{CONTAINER_LOGIN_PREFIX}{runtime_id}")
}

pub fn is_container_login(login: &str) -> bool {
    login.starts_with(CONTAINER_LOGIN_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryStore, NodeWatch};
    use async_trait::async_trait;
    use ensemble_common::{CreateMode, NodeStat};

    fn issuer(clock: Arc<ManualClock>) -> TokenIssuer {
        TokenIssuer::with_clock(TokenConfig::default(), clock)
    }

    #[test]
    fn test_generate_password_alphabet() {
        let secret = generate_password(16);
        assert_eq!(secret.len(), 16);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_password(16), secret);
    }

    #[test]
    fn test_container_login() {
        let login = container_login("root");
        assert_eq!(login, "container#root");
        assert!(is_container_login(&login));
        assert!(!is_container_login("admin"));
    }

    #[tokio::test]
    async fn test_first_call_issues_and_stores() {
        let client = MemoryStore::new().session();
        let issuer = issuer(Arc::new(ManualClock::new(1_000)));

        let secret = issuer.generate_token(&client, "root").await.unwrap();
        assert_eq!(secret.len(), 16);
        assert_eq!(
            nodes::get_string_data(&client, "/fabric/authentication/containers/root")
                .await
                .unwrap(),
            Some(secret)
        );
    }

    #[tokio::test]
    async fn test_reuse_within_window_then_rotate() {
        let client = MemoryStore::new().session();
        let clock = Arc::new(ManualClock::new(1_000));
        let issuer = issuer(clock.clone());

        let first = issuer.generate_token(&client, "x").await.unwrap();
        clock.advance(Duration::from_secs(30));
        let second = issuer.generate_token(&client, "x").await.unwrap();
        assert_eq!(first, second);

        clock.advance(Duration::from_secs(31));
        let third = issuer.generate_token(&client, "x").await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_window_without_node_issues_new() {
        let client = MemoryStore::new().session();
        let clock = Arc::new(ManualClock::new(1_000));
        let issuer = issuer(clock);

        issuer.generate_token(&client, "a").await.unwrap();
        // Different identity inside the window: nothing stored yet, so a fresh secret.
        let b = issuer.generate_token(&client, "b").await.unwrap();
        assert!(!b.is_empty());
        assert!(issuer.read_token(&client, "b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_token_and_listing() {
        let client = MemoryStore::new().session();
        let issuer = issuer(Arc::new(ManualClock::new(0)));
        assert!(issuer.container_tokens(&client).await.unwrap().is_empty());

        let secret = issuer.generate_token(&client, "c1").await.unwrap();
        let token = issuer.read_token(&client, "c1").await.unwrap().unwrap();
        assert_eq!(token.identity, "c1");
        assert_eq!(token.secret, secret);
        assert!(token.issued_at > 0);

        let all = issuer.container_tokens(&client).await.unwrap();
        assert_eq!(all.get("container#c1"), Some(&secret));
    }

    #[tokio::test]
    async fn test_rejects_bad_identity() {
        let client = MemoryStore::new().session();
        let issuer = issuer(Arc::new(ManualClock::new(0)));
        assert!(matches!(
            issuer.generate_token(&client, "a/b").await,
            Err(CoordError::InvalidArgument(_))
        ));
    }

    /// Store whose writes all fail with the same error
    struct FailingClient {
        fail: fn(&str) -> CoordError,
    }

    impl FailingClient {
        fn read_only() -> Self {
            Self {
                fail: |_| CoordError::StoreUnavailable("read-only".into()),
            }
        }

        fn timing_out() -> Self {
            Self {
                fail: |path| CoordError::Timeout(format!("write to {path}")),
            }
        }
    }

    #[async_trait]
    impl CoordinationClient for FailingClient {
        async fn exists(&self, _path: &str) -> Result<Option<NodeStat>> {
            Ok(None)
        }

        async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
            Err(CoordError::NoNode(path.to_string()))
        }

        async fn get_data_watch(&self, path: &str) -> Result<(Option<Vec<u8>>, NodeWatch)> {
            let (_tx, watch) = NodeWatch::new(path);
            Ok((None, watch))
        }

        async fn set_data(&self, path: &str, _data: Option<&[u8]>) -> Result<()> {
            Err((self.fail)(path))
        }

        async fn create(
            &self,
            path: &str,
            _data: Option<&[u8]>,
            _mode: CreateMode,
            _create_parents: bool,
        ) -> Result<String> {
            Err((self.fail)(path))
        }

        async fn children(&self, path: &str) -> Result<Vec<String>> {
            Err(CoordError::NoNode(path.to_string()))
        }

        async fn delete(&self, path: &str) -> Result<()> {
            Err((self.fail)(path))
        }
    }

    #[tokio::test]
    async fn test_partitioned_store_is_unavailable() {
        let issuer = issuer(Arc::new(ManualClock::new(0)));
        let err = issuer
            .generate_token(&FailingClient::read_only(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_other_store_failures_are_wrapped() {
        let issuer = issuer(Arc::new(ManualClock::new(0)));
        let err = issuer
            .generate_token(&FailingClient::timing_out(), "x")
            .await
            .unwrap_err();

        match err {
            CoordError::StoreOperationFailed { context, source } => {
                assert_eq!(context, "Cannot generate container token");
                let source = source.unwrap();
                assert!(matches!(
                    source.downcast_ref::<CoordError>(),
                    Some(CoordError::Timeout(_))
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
