//! Public key normalization between hex and bech32 `npub` encodings.
//!
//! A principal is identified by a 32-byte x-only public key with two
//! equivalent textual forms: 64 hex characters, or the checksummed bech32
//! encoding with human-readable prefix `npub`. Every input boundary accepts
//! both; storage and comparison always use lowercase hex.

use anyhow::{anyhow, Result};
use bech32::{FromBase32, ToBase32, Variant};
use thiserror::Error;

/// Human-readable prefix of the bech32 encoding.
pub const NPUB_HRP: &str = "npub";

/// A key that is neither 64 hex characters nor a well-formed `npub`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid pubkey format")]
pub struct InvalidFormat;

/// Normalize a principal key to 64 lowercase hex characters.
///
/// Accepts raw hex (any case) or an `npub1...` string; rejects everything
/// else, including well-formed bech32 with a foreign prefix or a payload
/// that is not exactly 32 bytes.
pub fn normalize(input: &str) -> Result<String, InvalidFormat> {
    if is_hex64(input) {
        return Ok(input.to_ascii_lowercase());
    }
    let (hrp, data, variant) = bech32::decode(input).map_err(|_| InvalidFormat)?;
    if hrp != NPUB_HRP || variant != Variant::Bech32 {
        return Err(InvalidFormat);
    }
    let bytes = Vec::<u8>::from_base32(&data).map_err(|_| InvalidFormat)?;
    if bytes.len() != 32 {
        return Err(InvalidFormat);
    }
    Ok(hex::encode(bytes))
}

/// Encode a 64-hex key as `npub1...`.
///
/// Total over valid hex64 input; anything else is an internal error, never a
/// silent fallback string.
pub fn to_npub(hex_key: &str) -> Result<String> {
    if !is_hex64(hex_key) {
        return Err(anyhow!("not a 64-char hex pubkey: {hex_key}"));
    }
    let bytes = hex::decode(hex_key)?;
    Ok(bech32::encode(NPUB_HRP, bytes.to_base32(), Variant::Bech32)?)
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    #[test]
    fn hex_is_lowercased() {
        let upper = KEY.to_ascii_uppercase();
        assert_eq!(normalize(&upper).unwrap(), KEY);
        assert_eq!(normalize(KEY).unwrap(), KEY);
    }

    #[test]
    fn npub_roundtrip() {
        let npub = to_npub(KEY).unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(normalize(&npub).unwrap(), KEY);
    }

    #[test]
    fn roundtrip_from_npub_side() {
        let npub = to_npub(KEY).unwrap();
        let hex = normalize(&npub).unwrap();
        assert_eq!(to_npub(&hex).unwrap(), npub);
    }

    #[test]
    fn rejects_wrong_lengths() {
        assert_eq!(normalize("abcd"), Err(InvalidFormat));
        assert_eq!(normalize(&"a".repeat(63)), Err(InvalidFormat));
        assert_eq!(normalize(&"a".repeat(65)), Err(InvalidFormat));
        assert_eq!(normalize(""), Err(InvalidFormat));
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert_eq!(normalize(&"z".repeat(64)), Err(InvalidFormat));
    }

    #[test]
    fn rejects_foreign_prefix() {
        // Valid bech32, wrong human-readable part.
        let bytes = hex::decode(KEY).unwrap();
        let nsec = bech32::encode("nsec", bytes.to_base32(), Variant::Bech32).unwrap();
        assert_eq!(normalize(&nsec), Err(InvalidFormat));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut npub = to_npub(KEY).unwrap();
        // Flip the last data character to break the checksum.
        let last = npub.pop().unwrap();
        npub.push(if last == 'q' { 'p' } else { 'q' });
        assert_eq!(normalize(&npub), Err(InvalidFormat));
    }

    #[test]
    fn rejects_short_payload() {
        let short = bech32::encode(NPUB_HRP, [0u8; 16].to_base32(), Variant::Bech32).unwrap();
        assert_eq!(normalize(&short), Err(InvalidFormat));
    }

    #[test]
    fn to_npub_rejects_invalid_hex() {
        assert!(to_npub("abcd").is_err());
        assert!(to_npub(&"z".repeat(64)).is_err());
    }
}
