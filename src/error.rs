//! Error taxonomy for the HTTP surface.
//!
//! Every authorization or validation failure is handled at the endpoint
//! boundary and translated to a status code here; nothing escapes to kill the
//! serving process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::storage::ReceiveError;

/// Terminal request outcomes, mapped onto HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No `Authorization: Nostr <base64>` header on a mutating request.
    #[error("missing authorization header")]
    MissingAuth,
    /// Header present but the event failed to decode.
    #[error("malformed authorization event")]
    MalformedAuth,
    /// Event kind is not the blob-authorization kind.
    #[error("wrong authorization event kind")]
    WrongKind,
    /// Event lacks the `["t", "upload"]` verb tag.
    #[error("authorization event missing upload verb")]
    WrongVerb,
    /// Event carried an `expiration` tag in the past.
    #[error("authorization event expired")]
    Expired,
    /// Signature absent or failed verification against id/pubkey.
    #[error("invalid authorization signature")]
    BadSignature,
    /// Verified principal is not permitted to write.
    #[error("pubkey not authorized for writes")]
    NotAuthorized,
    /// Principal key is neither valid hex nor a valid npub.
    #[error("Invalid pubkey format")]
    InvalidFormat,
    /// Upload body crossed the configured size cap.
    #[error("blob of at least {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    /// Received payload digest differs from the digest the token authorized.
    #[error("content digest mismatch: authorized {expected}, received {actual}")]
    HashMismatch { expected: String, actual: String },
    /// Missing blob or missing ownership row.
    #[error("blob not found")]
    NotFound,
    /// Storage or database fault; logged, surfaced as a generic 500.
    #[error("internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingAuth
            | ApiError::MalformedAuth
            | ApiError::WrongKind
            | ApiError::WrongVerb
            | ApiError::Expired
            | ApiError::BadSignature
            | ApiError::NotAuthorized => StatusCode::FORBIDDEN,
            ApiError::InvalidFormat
            | ApiError::TooLarge { .. }
            | ApiError::HashMismatch { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            tracing::error!("request failed: {err:#}");
        }
        let status = self.status();
        // Internal's Display is the generic message; detail stays in the log.
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<crate::pubkey::InvalidFormat> for ApiError {
    fn from(_: crate::pubkey::InvalidFormat) -> Self {
        ApiError::InvalidFormat
    }
}

impl From<ReceiveError> for ApiError {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::TooLarge { size, limit } => ApiError::TooLarge { size, limit },
            ReceiveError::Io(e) => ApiError::Internal(e.into()),
            ReceiveError::Body(e) => ApiError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_forbidden() {
        for err in [
            ApiError::MissingAuth,
            ApiError::MalformedAuth,
            ApiError::WrongKind,
            ApiError::WrongVerb,
            ApiError::Expired,
            ApiError::BadSignature,
            ApiError::NotAuthorized,
        ] {
            assert_eq!(err.status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn validation_failures_are_bad_request() {
        assert_eq!(ApiError::InvalidFormat.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::TooLarge { size: 10, limit: 5 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::HashMismatch {
                expected: "aa".into(),
                actual: "bb".into()
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn hash_mismatch_names_both_digests() {
        let msg = ApiError::HashMismatch {
            expected: "aa11".into(),
            actual: "bb22".into(),
        }
        .to_string();
        assert!(msg.contains("aa11"));
        assert!(msg.contains("bb22"));
    }

    #[test]
    fn internal_hides_detail() {
        let err = ApiError::Internal(anyhow::anyhow!("disk exploded at /var/blobs"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "internal server error");
    }
}
