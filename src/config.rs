//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};

/// Default upload size cap: 600 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 600 * 1024 * 1024;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for blobs, temp files, and the database.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7878`.
    pub bind_http: String,
    /// Externally visible base URL used in blob descriptors.
    pub base_url: String,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: u64,
    /// How write access is decided.
    pub auth_mode: AuthMode,
}

/// Strategy for authorizing uploads and deletes.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    /// Consult the locally persisted allow-list.
    Allowlist,
    /// Delegate the decision to a remote service.
    Remote { endpoint: String },
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP")?;
        let base_url = env::var("BASE_URL")?;
        url::Url::parse(&base_url).context("parsing BASE_URL")?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let max_upload_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(v) if !v.is_empty() => v.parse().context("parsing MAX_UPLOAD_BYTES")?,
            _ => DEFAULT_MAX_UPLOAD_BYTES,
        };
        let mode = env::var("AUTH_MODE").unwrap_or_default();
        let auth_mode = match mode.as_str() {
            "" | "allowlist" => AuthMode::Allowlist,
            "remote" => {
                let endpoint = env::var("AUTH_REMOTE_URL")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .context("AUTH_MODE=remote requires AUTH_REMOTE_URL")?;
                url::Url::parse(&endpoint).context("parsing AUTH_REMOTE_URL")?;
                AuthMode::Remote { endpoint }
            }
            other => bail!("unknown AUTH_MODE: {other}"),
        };
        Ok(Self {
            store_root,
            bind_http,
            base_url,
            max_upload_bytes,
            auth_mode,
        })
    }

    /// Path of the SQLite database inside the store root.
    pub fn db_path(&self) -> PathBuf {
        self.store_root.join("blosr.db")
    }
}
