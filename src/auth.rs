//! Authorization header verification for mutating requests.
//!
//! A client proves control of its keypair by attaching a signed Nostr event
//! of kind 24242 as `Authorization: Nostr <base64(JSON event)>`. Verification
//! is a single pass with short-circuit denial; every failure is terminal for
//! the request.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};

use crate::{error::ApiError, event::Event};

/// Kind number reserved for blob authorization events.
pub const AUTH_EVENT_KIND: u32 = 24242;

/// Authorization scheme prefix, case-sensitive.
const AUTH_SCHEME: &str = "Nostr ";

/// The single verb that authorizes both upload and delete.
const UPLOAD_VERB: &str = "upload";

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verify the `Authorization` header value of a mutating request.
///
/// Checks, in order: scheme prefix, base64/JSON decode into a strict
/// [`Event`], kind, `["t", "upload"]` verb tag, `expiration` tag against
/// `now` (a missing or unparsable expiration means no expiration), and the
/// Schnorr signature of `sig` over `id` with `pubkey`.
///
/// The event `id` is taken as given; it is not recomputed from the canonical
/// serialization. Payload integrity is enforced separately by matching the
/// received content digest against the token's `x` tag.
pub fn verify_auth_header(header: Option<&str>, now: u64) -> Result<Event, ApiError> {
    let header = header.ok_or(ApiError::MissingAuth)?;
    let encoded = header
        .strip_prefix(AUTH_SCHEME)
        .ok_or(ApiError::MissingAuth)?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::MalformedAuth)?;
    let event: Event = serde_json::from_slice(&raw).map_err(|_| ApiError::MalformedAuth)?;

    if event.kind != AUTH_EVENT_KIND {
        return Err(ApiError::WrongKind);
    }
    if !event.tag_values("t").contains(&UPLOAD_VERB) {
        return Err(ApiError::WrongVerb);
    }
    if let Some(deadline) = event
        .tag_value("expiration")
        .and_then(|v| v.parse::<u64>().ok())
    {
        if now > deadline {
            return Err(ApiError::Expired);
        }
    }
    if !verify_signature(&event) {
        return Err(ApiError::BadSignature);
    }
    Ok(event)
}

/// Check the Schnorr signature over the event id. Any undecodable field is a
/// plain verification failure, not an error.
fn verify_signature(ev: &Event) -> bool {
    let id = match hex::decode(&ev.id) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig_bytes = match hex::decode(&ev.sig) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let pk_bytes = match hex::decode(&ev.pubkey) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let msg = match Message::from_digest_slice(&id) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let sig = match Signature::from_slice(&sig_bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let pk = match XOnlyPublicKey::from_slice(&pk_bytes) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&sig, &msg, &pk).is_ok()
}
