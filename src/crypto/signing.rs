//! Ed25519 signing for receipts and ISM attestations

use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;

/// Ed25519 signature (64 bytes)
pub type Signature64 = [u8; SIGNATURE_LENGTH];

/// Ed25519 public key (32 bytes)
pub type PublicKey32 = [u8; PUBLIC_KEY_LENGTH];

/// Ed25519 seed (32 bytes)
pub type Seed32 = [u8; SECRET_KEY_LENGTH];

/// Error type for signing operations
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("signature verification failed")]
    VerificationFailed,
}

/// Node signing keypair for Ed25519 signatures
#[derive(Clone)]
pub struct NodeSigningKey {
    signing_key: SigningKey,
}

impl NodeSigningKey {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from seed bytes
    pub fn from_seed(seed: &Seed32) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Get the seed bytes. Callers must not let these reach logs.
    pub fn to_seed(&self) -> Seed32 {
        self.signing_key.to_bytes()
    }

    /// Get the verifying key for this signing key
    pub fn verifying_key(&self) -> NodeVerifyingKey {
        NodeVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> PublicKey32 {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message (canonical payload bytes or a payload hash)
    pub fn sign(&self, message: &[u8]) -> Signature64 {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for NodeSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSigningKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Node public key for Ed25519 signature verification
#[derive(Clone)]
pub struct NodeVerifyingKey {
    verifying_key: VerifyingKey,
}

impl NodeVerifyingKey {
    /// Create from public key bytes
    pub fn from_bytes(bytes: &PublicKey32) -> Result<Self, SigningError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| SigningError::InvalidPublicKeyFormat)?;
        Ok(Self { verifying_key })
    }

    /// Get the public key bytes
    pub fn to_bytes(&self) -> PublicKey32 {
        self.verifying_key.to_bytes()
    }

    /// Verify a signature over a message
    pub fn verify(&self, message: &[u8], signature: &Signature64) -> Result<(), SigningError> {
        let sig = Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| SigningError::VerificationFailed)
    }
}

impl std::fmt::Debug for NodeVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeVerifyingKey")
            .field("public_key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Verify a signature given raw public key bytes.
pub fn verify_signature(
    public_key: &PublicKey32,
    message: &[u8],
    signature: &Signature64,
) -> Result<(), SigningError> {
    NodeVerifyingKey::from_bytes(public_key)?.verify(message, signature)
}

/// Parse an Ed25519 public key from hex (with or without 0x prefix)
pub fn public_key_from_hex(hex_str: &str) -> Result<PublicKey32, SigningError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).map_err(|_| SigningError::InvalidPublicKeyFormat)?;
    bytes
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKeyFormat)
}

/// Parse a signature from base64url
pub fn signature_from_base64url(s: &str) -> Result<Signature64, SigningError> {
    let bytes = super::base64url_decode(s).ok_or(SigningError::InvalidSignatureFormat)?;
    bytes
        .try_into()
        .map_err(|_| SigningError::InvalidSignatureFormat)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signing_key = NodeSigningKey::generate();
        let verifying_key = signing_key.verifying_key();

        let message = b"canonical payload bytes";
        let signature = signing_key.sign(message);

        assert!(verifying_key.verify(message, &signature).is_ok());
        assert!(verifying_key.verify(b"different", &signature).is_err());
    }

    #[test]
    fn test_cross_key_verification_fails() {
        let key1 = NodeSigningKey::generate();
        let key2 = NodeSigningKey::generate();

        let signature = key1.sign(b"msg");
        assert!(key2.verifying_key().verify(b"msg", &signature).is_err());
    }

    #[test]
    fn test_seed_roundtrip() {
        let original = NodeSigningKey::generate();
        let restored = NodeSigningKey::from_seed(&original.to_seed());
        assert_eq!(original.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_deterministic_signatures() {
        let key = NodeSigningKey::generate();
        assert_eq!(key.sign(b"m"), key.sign(b"m"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = NodeSigningKey::generate();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("public_key"));
        assert!(!rendered.contains(&hex::encode(key.to_seed())));
    }

    #[test]
    fn test_public_key_from_hex() {
        let key = NodeSigningKey::generate();
        let hex_str = hex::encode(key.public_key_bytes());
        assert_eq!(public_key_from_hex(&hex_str).unwrap(), key.public_key_bytes());
        assert_eq!(
            public_key_from_hex(&format!("0x{hex_str}")).unwrap(),
            key.public_key_bytes()
        );
        assert!(public_key_from_hex("zz").is_err());
    }

    #[test]
    fn test_signature_base64url_roundtrip() {
        let key = NodeSigningKey::generate();
        let sig = key.sign(b"m");
        let encoded = crate::crypto::base64url_encode(&sig);
        assert_eq!(signature_from_base64url(&encoded).unwrap(), sig);
    }
}
