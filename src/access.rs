//! Access-control decision for mutating requests.
//!
//! Two mutually exclusive strategies, selected once at startup: membership in
//! the locally persisted allow-list, or delegation to a remote decision
//! service keyed by npub. Every ambiguous outcome fails closed.

use crate::{ledger::Ledger, pubkey};

/// Policy deciding whether a principal may upload or delete.
pub enum AccessPolicy {
    /// Set membership in the local `allowlist` table.
    Allowlist(Ledger),
    /// Single idempotent GET against a remote decision endpoint.
    Remote {
        endpoint: String,
        client: reqwest::Client,
    },
}

impl AccessPolicy {
    /// Build the remote variant with its own HTTP client.
    pub fn remote(endpoint: String) -> Self {
        AccessPolicy::Remote {
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    /// Decide whether `key` (hex or npub) may mutate storage.
    ///
    /// Fails closed: an unparsable key, a database fault, a transport fault,
    /// or a remote response without an explicit truthy `accept` field all
    /// deny. A single failed remote attempt is final for the request.
    pub async fn is_allowed(&self, key: &str) -> bool {
        let hex_key = match pubkey::normalize(key) {
            Ok(k) => k,
            Err(_) => {
                tracing::info!("write denied: unparsable pubkey");
                return false;
            }
        };
        match self {
            AccessPolicy::Allowlist(ledger) => match ledger.is_allowed(&hex_key).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    tracing::error!("allow-list lookup failed: {e:#}");
                    false
                }
            },
            AccessPolicy::Remote { endpoint, client } => {
                // The remote service's contract is keyed by the npub form.
                let npub = match pubkey::to_npub(&hex_key) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!("npub encode failed: {e:#}");
                        return false;
                    }
                };
                remote_accepts(client, endpoint, &npub).await
            }
        }
    }
}

async fn remote_accepts(client: &reqwest::Client, endpoint: &str, npub: &str) -> bool {
    let resp = match client.get(endpoint).query(&[("npub", npub)]).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("authorization service unreachable: {e}");
            return false;
        }
    };
    if !resp.status().is_success() {
        tracing::info!(status = %resp.status(), "authorization service refused {npub}");
        return false;
    }
    match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("accept")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        Err(e) => {
            tracing::warn!("authorization service sent invalid body: {e}");
            false
        }
    }
}
