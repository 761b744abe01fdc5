//! Nostr authorization event model.

use serde::{Deserialize, Serialize};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. The tags consulted for blob
/// authorization are:
///
/// - `t` – operation verb (`"upload"` authorizes both upload and delete)
/// - `x` – SHA-256 digest of the payload being authorized
/// - `m` – declared media type
/// - `expiration` – unix-seconds deadline after which the event is dead
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

/// Signed Nostr event carried in the `Authorization` header of a mutating
/// request.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "b5e3...",
///   "kind": 24242,
///   "created_at": 1700000000,
///   "tags": [["t", "upload"], ["x", "deadbeef..."], ["expiration", "1700003600"]],
///   "content": "upload photo.jpg",
///   "sig": "deadbeef"
/// }
/// ```
///
/// Decoding is strict: a missing field or wrong JSON type fails
/// deserialization, which the verifier maps to a malformed-authorization
/// denial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash of the canonical serialization).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number; blob authorization events use `24242`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Tags such as `t` (verb) or `x` (payload digest).
    pub tags: Vec<Tag>,
    /// Human-readable description of the operation.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// First value of the named tag, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags.iter().find_map(|Tag(fields)| match fields.as_slice() {
            [t, val, ..] if t == name => Some(val.as_str()),
            _ => None,
        })
    }

    /// All values of the named tag, in order of appearance.
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter_map(|Tag(fields)| match fields.as_slice() {
                [t, val, ..] if t == name => Some(val.as_str()),
                _ => None,
            })
            .collect()
    }
}
