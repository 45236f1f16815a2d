//! # Keeper - Ensemble operator tool
//!
//! Maintenance commands over the shared coordination tree: subtree copy and
//! delete, property inspection, container tokens, peer passwords, and
//! reference resolution.
//!
//! ## Architecture
//! ```text
//! keeper CLI → keeper lib → CoordinationClient → Redis (or in-process tree)
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Backend, KeeperConfig, StoreConfig};
use keeper::auth::{PeerPasswordDeriver, TokenIssuer, container_login};
use keeper::client::{CoordinationClient, MemoryClient, MemoryStore, RedisClient};
use keeper::{SubstitutionResolver, props, tree};

/// Ensemble Keeper - coordination tree maintenance
#[derive(Parser, Debug)]
#[command(name = "keeper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/keeper.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Store backend (overrides config)
    #[arg(long, value_enum, env = "KEEPER_BACKEND")]
    backend: Option<Backend>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a persistent subtree without overwriting existing nodes
    Copy {
        /// Source subtree
        from: String,
        /// Destination subtree on the same store (defaults to `from` with --dest-url)
        to: Option<String>,
        /// Copy into another Redis store, keeping paths unchanged
        #[arg(long)]
        dest_url: Option<String>,
    },

    /// Delete a subtree, then prune emptied ancestors up to a boundary
    Delete {
        path: String,
        /// Ancestor that must survive pruning (repeatable)
        #[arg(long = "up-to")]
        up_to: Vec<String>,
    },

    /// Print the properties stored at a node as JSON
    Props { path: String },

    /// Issue (or reuse) the secret of an identity
    Token {
        identity: String,
        /// Print the container login alongside the secret
        #[arg(long)]
        container: bool,
    },

    /// List every stored container secret
    Tokens,

    /// Derive the peer password from a local properties file
    PeerPassword {
        file: PathBuf,
        peer_id: i32,
        /// Digest name (overrides config)
        #[arg(long)]
        digest: Option<String>,
    },

    /// Expand `${zk:...}` references in text
    Resolve { text: String },
}

/// A client session on the configured backend
enum Session {
    Memory(MemoryClient),
    Redis(RedisClient),
}

impl Session {
    async fn open(store: &StoreConfig) -> Result<Self> {
        match store.backend {
            Backend::Memory => {
                info!("Using in-process store, changes are discarded on exit");
                Ok(Self::Memory(MemoryStore::new().session()))
            }
            Backend::Redis => {
                let client = RedisClient::connect(&store.redis())
                    .await
                    .with_context(|| format!("Failed to connect to {}", store.redis_url))?;
                info!(url = %store.redis_url, session = client.session_id(), "Redis connected");
                Ok(Self::Redis(client))
            }
        }
    }

    fn client(&self) -> &dyn CoordinationClient {
        match self {
            Self::Memory(client) => client,
            Self::Redis(client) => client,
        }
    }

    async fn close(self) -> Result<()> {
        let removed = match self {
            Self::Memory(client) => client.close().await,
            Self::Redis(client) => client.close().await.context("Failed to close session")?,
        };
        tracing::debug!(removed, "Session closed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Ensemble Keeper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = KeeperConfig::load(&args.config, &args)?;

    // Peer passwords need no store
    if let Command::PeerPassword { file, peer_id, digest } = &args.command {
        return peer_password(&config, file, *peer_id, digest.as_deref()).await;
    }

    let session = Session::open(&config.store).await?;
    let outcome = run(&args.command, &config, session.client()).await;
    session.close().await?;
    outcome
}

async fn run(command: &Command, config: &KeeperConfig, client: &dyn CoordinationClient) -> Result<()> {
    match command {
        Command::Copy { from, to, dest_url } => {
            let report = match (dest_url, to) {
                (Some(url), to) => {
                    if to.as_deref().is_some_and(|to| to != from.as_str()) {
                        bail!("Cross-store copy keeps paths; drop the destination or make it equal {from}");
                    }
                    let mut dest_config = config.store.redis();
                    dest_config.url = url.clone();
                    let dest = RedisClient::connect(&dest_config)
                        .await
                        .with_context(|| format!("Failed to connect to {url}"))?;
                    let report = tree::copy_between(client, &dest, from).await;
                    dest.close().await.context("Failed to close destination session")?;
                    report?
                }
                (None, Some(to)) => tree::copy_within(client, from, to).await?,
                (None, None) => bail!("Copy needs a destination path or --dest-url"),
            };
            info!(created = report.created.len(), skipped = report.skipped, "Copy finished");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Delete { path, up_to } => {
            if up_to.is_empty() {
                tree::delete_safe(client, path).await?;
            } else {
                let boundaries: Vec<&str> = up_to.iter().map(String::as_str).collect();
                tree::delete_safe_up_to(client, path, &boundaries).await?;
            }
            info!(path = %path, "Deleted");
        }

        Command::Props { path } => {
            let properties = props::get_properties(client, path).await?;
            println!("{}", serde_json::to_string_pretty(&properties)?);
        }

        Command::Token { identity, container } => {
            let issuer = TokenIssuer::new((&config.tokens).into());
            let secret = issuer.generate_token(client, identity).await?;
            if *container {
                println!("{} {}", container_login(identity), secret);
            } else {
                println!("{secret}");
            }
        }

        Command::Tokens => {
            let issuer = TokenIssuer::new((&config.tokens).into());
            let tokens = issuer.container_tokens(client).await?;
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }

        Command::Resolve { text } => {
            let resolved = SubstitutionResolver::new(client).resolve(text).await?;
            println!("{resolved}");
        }

        Command::PeerPassword { file, peer_id, digest } => {
            peer_password(config, file, *peer_id, digest.as_deref()).await?;
        }
    }

    Ok(())
}

async fn peer_password(
    config: &KeeperConfig,
    file: &Path,
    peer_id: i32,
    digest: Option<&str>,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let deriver = PeerPasswordDeriver::from_digest_name(digest.unwrap_or(&config.peer.digest))?;
    println!("{}", deriver.derive_from(props::parse_map(&text), peer_id));
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
