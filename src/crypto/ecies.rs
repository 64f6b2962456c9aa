//! ECIES envelope encryption for confidential requests and responses
//!
//! Key agreement is an ephemeral-static ECDH on secp256k1. Only the X
//! coordinate of the shared point (32 bytes) feeds HKDF-SHA256 with an empty
//! salt and the info string `vin-ecies-v1`, yielding the AES-256-GCM key.
//! A fresh 12-byte nonce is drawn per seal and the GCM tag rides appended to
//! the ciphertext.
//!
//! Public keys crossing the wire are parsed as curve points before any use
//! and rejected when off-curve.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use k256::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Nonce size for AES-GCM (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Compressed SEC1 point size (33 bytes)
pub const COMPRESSED_POINT_SIZE: usize = 33;

/// HKDF info string fixing the key-derivation domain
const KDF_INFO: &[u8] = b"vin-ecies-v1";

/// Error type for envelope operations.
///
/// Variants are deliberately coarse; the admission pipeline collapses all of
/// them into one client-facing kind so cryptographic failure modes are not
/// distinguishable from the outside.
#[derive(Debug, thiserror::Error)]
pub enum EciesError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid envelope format")]
    InvalidEnvelope,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,
}

/// Wire form of a sealed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// AES-256-GCM ciphertext with the tag appended, standard base64
    pub ciphertext: String,

    /// Sender's ephemeral public key, hex of the 33-byte compressed point
    pub ephemeral_pubkey: String,

    /// 12-byte AES-GCM nonce, hex
    pub nonce: String,
}

/// Derive the symmetric key from the ECDH shared X coordinate.
fn derive_aead_key(shared_x: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_x);
    let mut okm = [0u8; 32];
    // 32-byte output from HKDF-SHA256 cannot fail
    hk.expand(KDF_INFO, &mut okm)
        .expect("HKDF output length is valid");
    okm
}

/// Seal a plaintext to a recipient public key.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<EncryptedEnvelope, EciesError> {
    let ephemeral = SecretKey::random(&mut OsRng);

    let shared = diffie_hellman(ephemeral.to_nonzero_scalar(), recipient.as_affine());
    let key = derive_aead_key(shared.raw_secret_bytes().as_slice());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EciesError::EncryptionFailed)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| EciesError::EncryptionFailed)?;

    Ok(EncryptedEnvelope {
        ciphertext: super::base64_encode(&ciphertext),
        ephemeral_pubkey: public_key_hex(&ephemeral.public_key()),
        nonce: hex::encode(nonce_bytes),
    })
}

/// Open an envelope with the recipient's private key.
///
/// Fails if any curve-point parse fails, the nonce is malformed, or the tag
/// does not verify.
pub fn open(envelope: &EncryptedEnvelope, recipient: &SecretKey) -> Result<Vec<u8>, EciesError> {
    let ephemeral = parse_public_key_hex(&envelope.ephemeral_pubkey)?;
    let nonce_bytes = decode_nonce_hex(&envelope.nonce)?;
    let ciphertext =
        super::base64_decode(&envelope.ciphertext).ok_or(EciesError::InvalidEnvelope)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(EciesError::InvalidEnvelope);
    }

    let shared = diffie_hellman(recipient.to_nonzero_scalar(), ephemeral.as_affine());
    let key = derive_aead_key(shared.raw_secret_bytes().as_slice());

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EciesError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| EciesError::DecryptionFailed)
}

/// Parse a hex-encoded compressed secp256k1 public key, enforcing that the
/// bytes decode to a point on the curve.
pub fn parse_public_key_hex(s: &str) -> Result<PublicKey, EciesError> {
    let bytes = hex::decode(s).map_err(|_| EciesError::InvalidPublicKey)?;
    if bytes.len() != COMPRESSED_POINT_SIZE {
        return Err(EciesError::InvalidPublicKey);
    }
    PublicKey::from_sec1_bytes(&bytes).map_err(|_| EciesError::InvalidPublicKey)
}

/// Hex of the 33-byte compressed SEC1 encoding.
pub fn public_key_hex(pk: &PublicKey) -> String {
    hex::encode(pk.to_encoded_point(true).as_bytes())
}

/// Decode and length-check the envelope nonce.
pub fn decode_nonce_hex(s: &str) -> Result<[u8; NONCE_SIZE], EciesError> {
    let bytes = hex::decode(s).map_err(|_| EciesError::InvalidEnvelope)?;
    bytes.try_into().map_err(|_| EciesError::InvalidEnvelope)
}

/// Generate a fresh secp256k1 keypair.
pub fn generate_encryption_keypair() -> (SecretKey, PublicKey) {
    let sk = SecretKey::random(&mut OsRng);
    let pk = sk.public_key();
    (sk, pk)
}

// ============================================================================
// Tests
// ============================================================================
