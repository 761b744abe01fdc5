//! HTTP endpoints for blob fetch, upload, delete, and listing.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path as UrlPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    access::AccessPolicy,
    auth,
    error::ApiError,
    event::Event,
    ledger::{BlobRecord, Ledger},
    pubkey,
    storage::BlobStore,
};

/// Cache header for content-addressed data; the bytes behind a digest never
/// change.
const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Fallback content type when no media type was recorded.
const OCTET_STREAM: &str = "application/octet-stream";

/// Shared state handed to every handler.
pub struct AppState {
    pub store: BlobStore,
    pub ledger: Ledger,
    pub access: AccessPolicy,
    pub base_url: String,
    pub max_upload_bytes: u64,
}

/// Blob descriptor returned by the upload and list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub url: String,
    pub sha256: String,
    pub size: u64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub uploaded: u64,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/upload", put(upload_blob).head(upload_head))
        .route("/list/{pubkey}", get(list_blobs))
        .route("/{digest}", get(get_blob).head(head_blob).delete(delete_blob))
        .layer(cors)
        // The streaming size cap in BlobStore::receive governs upload size.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Start the HTTP server on `addr`.
pub async fn serve_http(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Health check endpoint.
async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Verify the authorization event, then ask the access policy about its
/// author. Shared by upload and delete; the single `upload` verb covers both.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Event, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = auth::verify_auth_header(header, auth::unix_now())?;
    if !state.access.is_allowed(&token.pubkey).await {
        tracing::info!("write denied for {}", token.pubkey);
        return Err(ApiError::NotAuthorized);
    }
    Ok(token)
}

/// Extract the digest from a path segment, ignoring an optional trailing
/// `.ext`. Anything that is not 64 hex chars is a plain miss on read paths.
fn digest_from_path(id: &str) -> Option<String> {
    let hash = id.split('.').next().unwrap_or(id);
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hash.to_ascii_lowercase())
    } else {
        None
    }
}

fn descriptor(base_url: &str, rec: BlobRecord) -> BlobDescriptor {
    BlobDescriptor {
        url: format!("{}/{}", base_url, rec.digest),
        sha256: rec.digest,
        size: rec.size,
        media_type: rec.media_type,
        uploaded: rec.uploaded_at,
    }
}

/// Stored media type for a digest, degrading to the default on lookup faults.
async fn media_type_or_default(state: &AppState, digest: &str) -> String {
    match state.ledger.media_type_for(digest).await {
        Ok(Some(media)) => media,
        Ok(None) => OCTET_STREAM.to_string(),
        Err(e) => {
            tracing::error!("media type lookup failed: {e:#}");
            OCTET_STREAM.to_string()
        }
    }
}

fn blob_headers(size: u64, media_type: &str, body: Body) -> Result<Response, ApiError> {
    Response::builder()
        .header(header::CONTENT_TYPE, media_type)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)
        .body(body)
        .map_err(|e| ApiError::Internal(e.into()))
}

/// GET `/{digest}` – stream a stored blob.
async fn get_blob(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let digest = digest_from_path(&id).ok_or(ApiError::NotFound)?;
    let size = state.store.stat(&digest).ok_or(ApiError::NotFound)?;
    let media_type = media_type_or_default(&state, &digest).await;
    let file = state.store.open(&digest).await.map_err(|_| ApiError::NotFound)?;
    blob_headers(size, &media_type, Body::from_stream(ReaderStream::new(file)))
}

/// HEAD `/{digest}` – existence check with the same headers as a fetch.
async fn head_blob(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let digest = digest_from_path(&id).ok_or(ApiError::NotFound)?;
    let size = state.store.stat(&digest).ok_or(ApiError::NotFound)?;
    let media_type = media_type_or_default(&state, &digest).await;
    blob_headers(size, &media_type, Body::empty())
}

/// HEAD `/upload` – advertise the upload size cap.
async fn upload_head(State(state): State<Arc<AppState>>) -> Response {
    Response::builder()
        .header("X-Max-Upload-Size", state.max_upload_bytes)
        .body(Body::empty())
        .unwrap()
}

/// PUT `/upload` – authorize, stream to a temp file, check the digest against
/// the token, then commit and record ownership.
async fn upload_blob(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let token = authorize(&state, &headers).await?;
    let staged = state
        .store
        .receive(body.into_data_stream(), state.max_upload_bytes)
        .await?;

    // The real payload-integrity guarantee: the bytes we actually received
    // must hash to a digest the token authorized. Reject before anything is
    // committed or recorded; dropping the staged blob removes the temp file.
    let authorized = token.tag_values("x");
    if !authorized
        .iter()
        .any(|x| x.eq_ignore_ascii_case(&staged.digest))
    {
        let expected = authorized
            .first()
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| "none".into());
        tracing::info!(
            "upload denied for {}: digest {} not authorized",
            token.pubkey,
            staged.digest
        );
        return Err(ApiError::HashMismatch {
            expected,
            actual: staged.digest,
        });
    }

    let size = staged.size;
    let digest = staged.digest.clone();
    state.store.commit(staged)?;

    let media_type = token.tag_value("m").map(str::to_string).or_else(|| {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let owner = token.pubkey.to_ascii_lowercase();
    let uploaded_at = auth::unix_now();
    state
        .ledger
        .record_upload(&digest, &owner, size, media_type.as_deref(), uploaded_at)
        .await?;
    tracing::debug!("stored {digest} ({size} bytes) for {owner}");

    let rec = BlobRecord {
        digest,
        owner,
        size,
        media_type,
        uploaded_at,
    };
    Ok((StatusCode::OK, Json(descriptor(&state.base_url, rec))).into_response())
}

/// DELETE `/{digest}` – drop the caller's ownership; the file disappears only
/// with its last owner.
async fn delete_blob(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = authorize(&state, &headers).await?;
    let digest = digest_from_path(&id).ok_or(ApiError::NotFound)?;
    let owner = token.pubkey.to_ascii_lowercase();
    let removed = state
        .ledger
        .remove_ownership(&digest, &owner, &state.store)
        .await?;
    if !removed {
        return Err(ApiError::NotFound);
    }
    tracing::debug!("removed ownership of {digest} by {owner}");
    Ok(StatusCode::OK.into_response())
}

/// GET `/list/{pubkey}` – every blob owned by a principal, newest first.
async fn list_blobs(
    State(state): State<Arc<AppState>>,
    UrlPath(key): UrlPath<String>,
) -> Result<Json<Vec<BlobDescriptor>>, ApiError> {
    let owner = pubkey::normalize(&key)?;
    let records = state.ledger.list_by_owner(&owner).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| descriptor(&state.base_url, r))
            .collect(),
    ))
}
