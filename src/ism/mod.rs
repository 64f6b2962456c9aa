//! Input Sanitization Module
//!
//! A minimal TEE service that attests an input arrived from an approved
//! non-human source. Each instance owns an Ed25519 keypair, a monotonic
//! sequence counter, and a bounded replay set keyed by
//! `{source_id}:{input_hash}`. Attestations are self-describing: the
//! verifier uses the public key embedded in the attestation, so any party
//! (including a different ISM instance) can verify statelessly.
//!
//! The signature covers **SHA-256 of** the canonical payload bytes, not the
//! payload itself. Verifiers must reproduce that exactly.
//!
//! The replay set is process-local and volatile; a restart re-opens a
//! bounded window in which an old input could be replayed.
//!
//! Externally, every source/type/signature failure surfaces the same opaque
//! "Input rejected" so callers cannot enumerate the approved-source set;
//! verbose reasons go to internal logs only.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{
    base64url_decode, base64url_encode, hash_hex, jcs, public_key_from_hex, sha256,
    verify_signature, CanonicalError, NodeSigningKey,
};
use crate::infra::TtlCache;

/// Attestation schema identifier
pub const ISM_SCHEMA: &str = "ism.input.v0";

/// Default maximum input size in bytes (1 MB)
pub const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// Default replay-set capacity
pub const DEFAULT_REPLAY_CAPACITY: usize = 10_000;

/// Default tolerated clock drift when verifying `received_at` (5 minutes)
pub const DEFAULT_MAX_CLOCK_DRIFT_MS: f64 = 5.0 * 60.0 * 1000.0;

/// Kinds of approved non-human sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    BlockchainEvent,
    ApiSigned,
    IsmChain,
    Cron,
    VrfChallenge,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockchainEvent => write!(f, "blockchain_event"),
            Self::ApiSigned => write!(f, "api_signed"),
            Self::IsmChain => write!(f, "ism_chain"),
            Self::Cron => write!(f, "cron"),
            Self::VrfChallenge => write!(f, "vrf_challenge"),
        }
    }
}

/// An approved source, fixed at ISM construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedSource {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: SourceType,

    /// Ed25519 public key (hex) for `api_signed` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// An input submitted for attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInput {
    pub source_id: String,
    pub source_type: SourceType,

    /// Object inputs are canonicalized; string inputs are used as-is
    pub data: serde_json::Value,

    /// base64url Ed25519 signature over the input bytes (`api_signed`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pubkey: Option<String>,

    /// Required for `blockchain_event`; on-chain verification is deferred
    /// to an external verifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
}

/// A signed input attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAttestation {
    pub schema: String,
    pub ism_id: String,

    /// Ed25519 public key of the issuing ISM, hex
    pub ism_pubkey: String,

    /// SHA-256 over the input bytes, lowercase hex
    pub input_hash: String,

    pub input_type: String,
    pub input_source: String,

    /// Unix milliseconds from the injected clock
    pub received_at: u64,

    /// Strictly increasing per instance, starts at 1
    pub sequence: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pubkey: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tee_attestation: Option<String>,

    /// base64url Ed25519 signature over sha256(JCS(payload without sig))
    pub sig: String,
}

impl InputAttestation {
    /// Canonical bytes the signature covers: the object minus `sig`.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| CanonicalError::Unrepresentable(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.remove("sig");
        }
        jcs(&value)
    }
}

/// Externally visible rejection reasons.
///
/// All source, type, and signature failures collapse into `Rejected` so the
/// error surface cannot be used to enumerate approved sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IsmError {
    #[error("Input rejected")]
    Rejected,

    #[error("Input too large")]
    TooLarge,

    #[error("Duplicate input rejected")]
    Duplicate,

    #[error("Clock error")]
    Clock,

    #[error("Internal error")]
    Internal,
}

/// Clock injection point; milliseconds since the unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// The real clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64
    }
}

/// An ISM instance. Always in the READY state; the only visible transitions
/// are monotonic sequence growth and bounded replay-set growth.
pub struct InputSanitizationModule {
    id: String,
    signing_key: NodeSigningKey,
    sources: HashMap<String, ApprovedSource>,
    sequence: Mutex<u64>,
    replay: TtlCache<String, ()>,
    max_input_size: usize,
    tee_attestation: Option<String>,
    clock: Box<dyn Clock>,
}

impl InputSanitizationModule {
    pub fn new(id: impl Into<String>, sources: Vec<ApprovedSource>) -> Self {
        Self {
            id: id.into(),
            signing_key: NodeSigningKey::generate(),
            sources: sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
            sequence: Mutex::new(0),
            replay: TtlCache::unbounded_ttl(DEFAULT_REPLAY_CAPACITY),
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            tee_attestation: None,
            clock: Box::new(SystemClock),
        }
    }

    /// Replace the clock source (tests, deterministic replay).
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_input_size(mut self, max_input_size: usize) -> Self {
        self.max_input_size = max_input_size;
        self
    }

    pub fn with_replay_capacity(mut self, capacity: usize) -> Self {
        self.replay = TtlCache::unbounded_ttl(capacity);
        self
    }

    /// Attach an opaque TEE attestation blob carried in every attestation.
    pub fn with_tee_attestation(mut self, blob: impl Into<String>) -> Self {
        self.tee_attestation = Some(blob.into());
        self
    }

    /// The instance's Ed25519 public key, hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.public_key_bytes())
    }

    /// Current sequence value (number of attestations issued).
    pub fn sequence(&self) -> u64 {
        *self.sequence.lock().unwrap()
    }

    /// Attest an input. First failure wins.
    pub fn attest(&self, raw: &RawInput) -> Result<InputAttestation, IsmError> {
        // 1. source lookup
        let Some(source) = self.sources.get(&raw.source_id) else {
            warn!(submitted = %raw.source_id, "attest rejected: unknown source");
            return Err(IsmError::Rejected);
        };

        // 2. declared type must match the registration
        if source.kind != raw.source_type {
            warn!(
                declared = %raw.source_type,
                registered = %source.kind,
                "attest rejected: source type mismatch"
            );
            return Err(IsmError::Rejected);
        }

        // 3. canonical input bytes
        let input_bytes: Vec<u8> = match &raw.data {
            serde_json::Value::String(s) => s.clone().into_bytes(),
            other => jcs(other).map_err(|_| {
                warn!("attest rejected: input not canonicalizable");
                IsmError::Rejected
            })?,
        };

        // 4. size bound
        if input_bytes.len() > self.max_input_size {
            return Err(IsmError::TooLarge);
        }

        // 5. input hash
        let input_hash = hash_hex(&sha256(&input_bytes));

        // 6. replay fast path; the authoritative check-and-insert is step 9
        let replay_key = format!("{}:{}", raw.source_id, input_hash);
        if self.replay.get(&replay_key).is_some() {
            debug!(input_hash = %input_hash, "attest rejected: duplicate input");
            return Err(IsmError::Duplicate);
        }

        // 7. signed-API sources must prove possession of the registered key
        if source.kind == SourceType::ApiSigned {
            if let Some(pubkey_hex) = &source.pubkey {
                let Some(signature_b64) = &raw.source_signature else {
                    warn!("attest rejected: missing source signature");
                    return Err(IsmError::Rejected);
                };
                let signature: [u8; 64] = base64url_decode(signature_b64)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or_else(|| {
                        warn!("attest rejected: malformed source signature");
                        IsmError::Rejected
                    })?;
                let pubkey = public_key_from_hex(pubkey_hex).map_err(|_| {
                    warn!("attest rejected: registered source key is malformed");
                    IsmError::Rejected
                })?;
                if verify_signature(&pubkey, &input_bytes, &signature).is_err() {
                    warn!("attest rejected: source signature verification failed");
                    return Err(IsmError::Rejected);
                }
            }
        }

        // 8. chain events must carry the block hash they claim to come from
        if source.kind == SourceType::BlockchainEvent && raw.block_hash.is_none() {
            warn!("attest rejected: blockchain event without block hash");
            return Err(IsmError::Rejected);
        }

        // 9. record in the replay set; the insert is the atomic critical
        // section, so concurrent attests of the same input admit exactly one
        if !self.replay.insert_if_absent(replay_key, ()) {
            debug!(input_hash = %input_hash, "attest rejected: duplicate input");
            return Err(IsmError::Duplicate);
        }

        // 10. clock read
        let now_ms = self.clock.now_ms();
        if !now_ms.is_finite() || now_ms < 0.0 {
            return Err(IsmError::Clock);
        }

        // 11. sequence increment
        let sequence = {
            let mut sequence = self.sequence.lock().unwrap();
            *sequence += 1;
            *sequence
        };

        // 12. build, canonicalize, sign the hash of the payload
        let mut attestation = InputAttestation {
            schema: ISM_SCHEMA.to_string(),
            ism_id: self.id.clone(),
            ism_pubkey: self.public_key_hex(),
            input_hash,
            input_type: source.kind.to_string(),
            input_source: raw.source_id.clone(),
            received_at: now_ms as u64,
            sequence,
            source_signature: raw.source_signature.clone(),
            source_pubkey: raw.source_pubkey.clone(),
            block_hash: raw.block_hash.clone(),
            tee_attestation: self.tee_attestation.clone(),
            sig: String::new(),
        };

        let payload = attestation
            .signing_payload()
            .map_err(|_| IsmError::Internal)?;
        attestation.sig = base64url_encode(&self.signing_key.sign(&sha256(&payload)));

        Ok(attestation)
    }
}

/// Verify an attestation using the public key it carries.
///
/// Stateless; the verifying party may be a different ISM instance or no ISM
/// at all.
pub fn verify_attestation(attestation: &InputAttestation) -> Result<(), IsmError> {
    verify_attestation_at(
        attestation,
        SystemClock.now_ms(),
        DEFAULT_MAX_CLOCK_DRIFT_MS,
    )
}

/// `verify_attestation` with an explicit clock reading and drift bound.
pub fn verify_attestation_at(
    attestation: &InputAttestation,
    now_ms: f64,
    max_drift_ms: f64,
) -> Result<(), IsmError> {
    if attestation.received_at as f64 > now_ms + max_drift_ms {
        return Err(IsmError::Rejected);
    }

    let payload = attestation
        .signing_payload()
        .map_err(|_| IsmError::Rejected)?;
    let pubkey = public_key_from_hex(&attestation.ism_pubkey).map_err(|_| IsmError::Rejected)?;
    let signature: [u8; 64] = base64url_decode(&attestation.sig)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(IsmError::Rejected)?;

    // The ISM signs the hash of the payload, not the payload itself
    verify_signature(&pubkey, &sha256(&payload), &signature).map_err(|_| IsmError::Rejected)
}

// ============================================================================
// Tests
// ============================================================================
