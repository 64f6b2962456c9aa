//! Canonical hashing for commitments and signed payloads
//!
//! Every commitment in the protocol is a SHA-256 over the RFC 8785 (JCS)
//! canonical form of a JSON value, so that an independent implementation can
//! reproduce it byte for byte:
//! - Object keys sorted by UTF-16 code unit
//! - ES6 number serialization (shortest round-trip form, `-0` becomes `0`)
//! - No insignificant whitespace; arrays keep their order
//!
//! Text hashes (`output_clean_hash`, `output_transport_hash`, ISM input
//! hashes) are SHA-256 over the raw UTF-8 bytes instead. Hex output is
//! always lowercase without a `0x` prefix; base64url output carries no
//! padding.

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

/// Error type for canonicalization failures
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("value cannot be canonicalized: {0}")]
    Unrepresentable(String),
}

/// Serialize a JSON value to its RFC 8785 canonical byte form.
///
/// Fails on values JCS cannot represent (NaN or infinite floats). Two
/// implementations of this function must produce byte-identical output for
/// the same logical value; the receipt and ISM signatures depend on it.
pub fn jcs(value: &serde_json::Value) -> Result<Vec<u8>, CanonicalError> {
    serde_json_canonicalizer::to_vec(value)
        .map_err(|e| CanonicalError::Unrepresentable(e.to_string()))
}

/// Canonical string form, for tests and debugging.
pub fn jcs_string(value: &serde_json::Value) -> Result<String, CanonicalError> {
    serde_json_canonicalizer::to_string(value)
        .map_err(|e| CanonicalError::Unrepresentable(e.to_string()))
}

/// Hash raw bytes with SHA-256
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the canonical JSON form: the commitment convention.
pub fn hash_canonical(value: &serde_json::Value) -> Result<Hash256, CanonicalError> {
    Ok(sha256(&jcs(value)?))
}

/// SHA-256 over UTF-8 text: the output-hash convention.
pub fn hash_text(text: &str) -> Hash256 {
    sha256(text.as_bytes())
}

/// Lowercase hex encoding of a hash, no prefix.
pub fn hash_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}

/// Commitment over a canonical JSON value as lowercase hex.
pub fn commitment_hex(value: &serde_json::Value) -> Result<String, CanonicalError> {
    Ok(hash_hex(&hash_canonical(value)?))
}

/// Encode bytes as base64url without padding
pub fn base64url_encode(data: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, data)
}

/// Decode base64url (with or without padding)
pub fn base64url_decode(s: &str) -> Option<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, s)
        .or_else(|_| base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE, s))
        .ok()
}

/// Encode bytes as standard base64 (ciphertext fields)
pub fn base64_encode(data: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data)
}

/// Decode standard base64
pub fn base64_decode(s: &str) -> Option<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s).ok()
}

// ============================================================================
// Tests
// ============================================================================
