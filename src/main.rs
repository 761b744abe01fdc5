//! Command line interface for operating the blob server. Supports
//! initialization, serving the HTTP endpoints, blob integrity verification,
//! and allow-list administration.

mod access;
mod auth;
mod config;
mod error;
mod event;
mod ledger;
mod pubkey;
mod server;
mod storage;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::{AuthMode, Settings};
use ledger::Ledger;
use storage::BlobStore;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "blosr",
    author,
    version,
    about = "Content-addressed blob server with Nostr authorization"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree and database at `STORE_ROOT`.
    Init,
    /// Launch the HTTP service.
    Serve,
    /// Verify a random sample of stored blobs against their digests.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
    },
    /// Manage the upload allow-list.
    Allow {
        #[command(subcommand)]
        action: AllowAction,
    },
}

/// Operations available under `blosr allow`.
#[derive(Subcommand)]
enum AllowAction {
    /// Add a principal (hex or npub) to the allow-list.
    Add { key: String },
    /// Remove a principal from the allow-list.
    Remove { key: String },
    /// Print every allow-listed principal.
    List,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = BlobStore::new(cfg.store_root.clone());
    match cli.command {
        Commands::Init => {
            // Create the on-disk directory structure and the database schema.
            store.init()?;
            Ledger::open(&cfg.db_path()).await?;
        }
        Commands::Serve => {
            store.init()?;
            let ledger = Ledger::open(&cfg.db_path()).await?;
            let access = match &cfg.auth_mode {
                AuthMode::Allowlist => access::AccessPolicy::Allowlist(ledger.clone()),
                AuthMode::Remote { endpoint } => access::AccessPolicy::remote(endpoint.clone()),
            };
            let addr: SocketAddr = cfg.bind_http.as_str().parse()?;
            let state = Arc::new(server::AppState {
                store,
                ledger,
                access,
                base_url: cfg.base_url.clone(),
                max_upload_bytes: cfg.max_upload_bytes,
            });
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            server::serve_http(addr, state, shutdown).await?;
        }
        Commands::Verify { sample } => {
            let checked = store.verify_sample(sample)?;
            println!("verified {checked} blobs");
        }
        Commands::Allow { action } => {
            let ledger = Ledger::open(&cfg.db_path()).await?;
            handle_allow(action, &ledger).await?;
        }
    }
    Ok(())
}

async fn handle_allow(action: AllowAction, ledger: &Ledger) -> anyhow::Result<()> {
    match action {
        AllowAction::Add { key } => {
            let hex_key =
                pubkey::normalize(&key).with_context(|| format!("cannot parse key {key}"))?;
            if !ledger.allow(&hex_key).await? {
                bail!("already allowed: {hex_key}");
            }
            println!("allowed {hex_key}");
        }
        AllowAction::Remove { key } => {
            let hex_key =
                pubkey::normalize(&key).with_context(|| format!("cannot parse key {key}"))?;
            if !ledger.disallow(&hex_key).await? {
                bail!("not allowed: {hex_key}");
            }
            println!("removed {hex_key}");
        }
        AllowAction::List => {
            for key in ledger.allowed_keys().await? {
                println!("{key}");
            }
        }
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("blosr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7878\n");
    content.push_str("BASE_URL=http://127.0.0.1:7878\n");
    content.push_str("MAX_UPLOAD_BYTES=629145600\n");
    content.push_str("AUTH_MODE=allowlist\n");
    content.push_str("AUTH_REMOTE_URL=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    run(cli).await
}
