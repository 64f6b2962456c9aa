//! Node keypair resolution
//!
//! The node identity is a pair of keys created at process start and held in
//! memory for the process lifetime: an Ed25519 signing key (receipts) and a
//! secp256k1 key (envelope decryption). Resolution order:
//!
//! 1. TEE key derivation when the platform agent is available
//! 2. a configured key file, when it exists
//! 3. generate and persist to the configured path (owner-only)
//! 4. ephemeral keys, with a prominent warning
//!
//! Private material never reaches logs, panics, or error payloads.

use std::fs;
use std::path::Path;

use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::tee::TeeAdapter;
use crate::crypto::{base64url_encode, public_key_hex, NodeSigningKey};

/// Derivation label for the signing key
pub const SIGNING_DERIVATION_PATH: &str = "vin-signing-v1";

/// Derivation label for the encryption key
pub const ENCRYPTION_DERIVATION_PATH: &str = "vin-encryption-v1";

/// Error type for key resolution
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("key file is malformed")]
    Malformed,

    #[error("key material is invalid")]
    InvalidMaterial,
}

/// Where the keypair came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    TeeDerived,
    KeyFile,
    Generated,
    Ephemeral,
}

/// The node's long-lived keypairs.
pub struct NodeKeypair {
    signing: NodeSigningKey,
    encryption: SecretKey,
}

impl NodeKeypair {
    fn from_seeds(signing_seed: &[u8; 32], encryption_scalar: &[u8; 32]) -> Result<Self, KeyError> {
        let encryption =
            SecretKey::from_slice(encryption_scalar).map_err(|_| KeyError::InvalidMaterial)?;
        Ok(Self {
            signing: NodeSigningKey::from_seed(signing_seed),
            encryption,
        })
    }

    /// Fresh random keypair (the ephemeral path; also the test seam).
    pub fn generate() -> Self {
        Self {
            signing: NodeSigningKey::generate(),
            encryption: SecretKey::random(&mut OsRng),
        }
    }

    /// Read-only reference to the signing key
    pub fn signing(&self) -> &NodeSigningKey {
        &self.signing
    }

    /// Read-only reference to the encryption private key
    pub fn encryption_secret(&self) -> &SecretKey {
        &self.encryption
    }

    pub fn encryption_public(&self) -> PublicKey {
        self.encryption.public_key()
    }

    /// Ed25519 public key, base64url (the receipt `node_pubkey` form)
    pub fn node_pubkey_b64url(&self) -> String {
        base64url_encode(&self.signing.public_key_bytes())
    }

    /// Compressed secp256k1 public key, hex (the envelope recipient form)
    pub fn encryption_pubkey_hex(&self) -> String {
        public_key_hex(&self.encryption_public())
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("node_pubkey", &self.node_pubkey_b64url())
            .field("encryption_pubkey", &self.encryption_pubkey_hex())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    signing_seed: String,
    encryption_scalar: String,
}

/// Resolves and owns the node keypair.
pub struct KeyManager {
    keypair: NodeKeypair,
    source: KeySource,
}

impl KeyManager {
    /// Resolve keys in the documented order.
    pub async fn resolve(tee: &TeeAdapter, key_path: Option<&Path>) -> Result<Self, KeyError> {
        if tee.available().await {
            let signing_seed = tee.derive_key(SIGNING_DERIVATION_PATH).await;
            let encryption_scalar = tee.derive_key(ENCRYPTION_DERIVATION_PATH).await;
            match (signing_seed, encryption_scalar) {
                (Some(signing_seed), Some(encryption_scalar)) => {
                    match NodeKeypair::from_seeds(&signing_seed, &encryption_scalar) {
                        Ok(keypair) => {
                            info!("node keys derived from platform agent");
                            return Ok(Self {
                                keypair,
                                source: KeySource::TeeDerived,
                            });
                        }
                        Err(_) => {
                            warn!("platform agent returned unusable key material; falling back")
                        }
                    }
                }
                _ => warn!("platform agent available but key derivation failed; falling back"),
            }
        }

        if let Some(path) = key_path {
            if path.exists() {
                let keypair = Self::load_file(path)?;
                info!(path = %path.display(), "node keys loaded from file");
                return Ok(Self {
                    keypair,
                    source: KeySource::KeyFile,
                });
            }

            let keypair = NodeKeypair::generate();
            Self::persist(path, &keypair)?;
            warn!(path = %path.display(), "generated new node key file");
            return Ok(Self {
                keypair,
                source: KeySource::Generated,
            });
        }

        warn!("no key path configured; node identity is ephemeral and will change on restart");
        Ok(Self {
            keypair: NodeKeypair::generate(),
            source: KeySource::Ephemeral,
        })
    }

    pub fn keypair(&self) -> &NodeKeypair {
        &self.keypair
    }

    /// Consume the manager, yielding the resolved keypair.
    pub fn into_keypair(self) -> NodeKeypair {
        self.keypair
    }

    pub fn source(&self) -> KeySource {
        self.source
    }

    fn load_file(path: &Path) -> Result<NodeKeypair, KeyError> {
        let contents = fs::read_to_string(path)?;
        let file: KeyFile = serde_json::from_str(&contents).map_err(|_| KeyError::Malformed)?;

        let signing_seed: [u8; 32] = hex::decode(&file.signing_seed)
            .map_err(|_| KeyError::Malformed)?
            .try_into()
            .map_err(|_| KeyError::Malformed)?;
        let encryption_scalar: [u8; 32] = hex::decode(&file.encryption_scalar)
            .map_err(|_| KeyError::Malformed)?
            .try_into()
            .map_err(|_| KeyError::Malformed)?;

        NodeKeypair::from_seeds(&signing_seed, &encryption_scalar)
    }

    fn persist(path: &Path, keypair: &NodeKeypair) -> Result<(), KeyError> {
        let key_file = KeyFile {
            signing_seed: hex::encode(keypair.signing.to_seed()),
            encryption_scalar: hex::encode(keypair.encryption.to_bytes()),
        };
        let contents =
            serde_json::to_string_pretty(&key_file).map_err(|_| KeyError::InvalidMaterial)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // The mode is baked into creation so the file never exists with
        // anything weaker than owner-only
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut out = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)?;
            out.write_all(contents.as_bytes())?;
        }
        #[cfg(not(unix))]
        fs::write(path, &contents)?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
