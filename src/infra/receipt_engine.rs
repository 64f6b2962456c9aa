//! Receipt build, sign, and verify
//!
//! Build canonicalizes the receipt payload (every field except `sig`) with
//! JCS and signs it with the node's Ed25519 key. Verify replays the same
//! construction in a fixed order; the first failing check wins and is
//! reported by reason. The replay cache makes a receipt single-use within
//! its validity window: check-and-insert runs atomically so two concurrent
//! verifications of the same receipt cannot both succeed.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::json;

use super::cache::TtlCache;
use crate::crypto::{
    base64url_decode, base64url_encode, commitment_hex, hash_hex, hash_text, verify_signature,
    CanonicalError, NodeSigningKey,
};
use crate::domain::{
    ActionRequest, AttestationInfo, Output, PaymentInfo, Receipt, RECEIPT_SCHEMA, RECEIPT_VERSION,
};

/// Default receipt validity
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(600);

/// Default replay-cache capacity
pub const DEFAULT_REPLAY_CAPACITY: usize = 10_000;

/// Tolerated forward clock skew when checking `iat`
const CLOCK_SKEW_SECS: u64 = 60;

/// Receipt nonce length in bytes
const NONCE_LEN: usize = 16;

/// Error type for receipt construction
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Why a receipt failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyReason {
    InvalidSchema,
    IssuedInFuture,
    Expired,
    ReplayDetected,
    InputsCommitmentMismatch,
    ConstraintsCommitmentMismatch,
    LlmCommitmentMismatch,
    OutputCleanHashMismatch,
    OutputTransportHashMismatch,
    SignatureInvalid,
}

impl VerifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSchema => "invalid_schema",
            Self::IssuedInFuture => "issued_in_future",
            Self::Expired => "expired",
            Self::ReplayDetected => "replay_detected",
            Self::InputsCommitmentMismatch => "inputs_commitment_mismatch",
            Self::ConstraintsCommitmentMismatch => "constraints_commitment_mismatch",
            Self::LlmCommitmentMismatch => "llm_commitment_mismatch",
            Self::OutputCleanHashMismatch => "output_clean_hash_mismatch",
            Self::OutputTransportHashMismatch => "output_transport_hash_mismatch",
            Self::SignatureInvalid => "signature_invalid",
        }
    }
}

impl std::fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification result as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<VerifyReason>,
}

impl VerifyOutcome {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn fail(reason: VerifyReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Builds and verifies receipts; owns the replay cache.
pub struct ReceiptEngine {
    validity: Duration,
    replay: TtlCache<String, ()>,
}

impl ReceiptEngine {
    pub fn new(validity: Duration, replay_capacity: usize) -> Self {
        Self {
            validity,
            replay: TtlCache::new(replay_capacity, validity),
        }
    }

    /// Build and sign a receipt for a completed action.
    pub fn build(
        &self,
        request: &ActionRequest,
        output: &Output,
        signing_key: &NodeSigningKey,
        attestation: AttestationInfo,
        payment: PaymentInfo,
    ) -> Result<Receipt, BuildError> {
        let iat = unix_now();
        let exp = iat + self.validity.as_secs();

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let empty = json!({});
        let mut receipt = Receipt {
            schema: RECEIPT_SCHEMA.to_string(),
            version: RECEIPT_VERSION.to_string(),
            node_pubkey: base64url_encode(&signing_key.public_key_bytes()),
            request_id: request.request_id.clone(),
            action_type: request.action_type.clone(),
            policy_id: request.policy_id.clone(),
            inputs_commitment: commitment_hex(&request.inputs)?,
            constraints_commitment: commitment_hex(request.constraints.as_ref().unwrap_or(&empty))?,
            llm_commitment: commitment_hex(request.llm.as_ref().unwrap_or(&empty))?,
            output_clean_hash: hash_hex(&hash_text(&output.clean_text)),
            output_transport_hash: hash_hex(&hash_text(&output.text)),
            iat,
            exp,
            nonce: base64url_encode(&nonce),
            attestation,
            payment,
            sig: String::new(),
        };

        let payload = receipt.signing_payload()?;
        receipt.sig = base64url_encode(&signing_key.sign(&payload));
        Ok(receipt)
    }

    /// Verify a receipt against the request and output it claims to cover.
    ///
    /// Check order is part of the protocol; the first failure wins.
    pub fn verify(
        &self,
        request: &ActionRequest,
        output: &Output,
        receipt: &Receipt,
    ) -> VerifyOutcome {
        // 1. schema
        if receipt.schema != RECEIPT_SCHEMA {
            return VerifyOutcome::fail(VerifyReason::InvalidSchema);
        }

        // 2. time window
        let now = unix_now();
        if receipt.iat > now + CLOCK_SKEW_SECS {
            return VerifyOutcome::fail(VerifyReason::IssuedInFuture);
        }
        if receipt.exp < now {
            return VerifyOutcome::fail(VerifyReason::Expired);
        }

        // 3. replay: record on first verify, reject the second
        self.replay.sweep_expired();
        let replay_key = format!("{}:{}", receipt.node_pubkey, receipt.nonce);
        let remaining = Duration::from_secs(receipt.exp - now);
        if !self
            .replay
            .insert_if_absent_with_ttl(replay_key, (), Some(remaining))
        {
            return VerifyOutcome::fail(VerifyReason::ReplayDetected);
        }

        // 4. request commitments
        let empty = json!({});
        match commitment_hex(&request.inputs) {
            Ok(commitment) if commitment == receipt.inputs_commitment => {}
            _ => return VerifyOutcome::fail(VerifyReason::InputsCommitmentMismatch),
        }
        match commitment_hex(request.constraints.as_ref().unwrap_or(&empty)) {
            Ok(commitment) if commitment == receipt.constraints_commitment => {}
            _ => return VerifyOutcome::fail(VerifyReason::ConstraintsCommitmentMismatch),
        }
        match commitment_hex(request.llm.as_ref().unwrap_or(&empty)) {
            Ok(commitment) if commitment == receipt.llm_commitment => {}
            _ => return VerifyOutcome::fail(VerifyReason::LlmCommitmentMismatch),
        }

        // 5. output hashes
        if hash_hex(&hash_text(&output.clean_text)) != receipt.output_clean_hash {
            return VerifyOutcome::fail(VerifyReason::OutputCleanHashMismatch);
        }
        if hash_hex(&hash_text(&output.text)) != receipt.output_transport_hash {
            return VerifyOutcome::fail(VerifyReason::OutputTransportHashMismatch);
        }

        // 6. signature over the canonical payload
        let Some(pubkey_bytes) = base64url_decode(&receipt.node_pubkey) else {
            return VerifyOutcome::fail(VerifyReason::SignatureInvalid);
        };
        let Ok(pubkey) = <[u8; 32]>::try_from(pubkey_bytes) else {
            return VerifyOutcome::fail(VerifyReason::SignatureInvalid);
        };
        let Some(sig_bytes) = base64url_decode(&receipt.sig) else {
            return VerifyOutcome::fail(VerifyReason::SignatureInvalid);
        };
        let Ok(signature) = <[u8; 64]>::try_from(sig_bytes) else {
            return VerifyOutcome::fail(VerifyReason::SignatureInvalid);
        };
        let Ok(payload) = receipt.signing_payload() else {
            return VerifyOutcome::fail(VerifyReason::SignatureInvalid);
        };
        if verify_signature(&pubkey, &payload, &signature).is_err() {
            return VerifyOutcome::fail(VerifyReason::SignatureInvalid);
        }

        VerifyOutcome::ok()
    }

    /// Replay-cache occupancy; diagnostics only.
    pub fn replay_entries(&self) -> usize {
        self.replay.len()
    }
}

impl Default for ReceiptEngine {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDITY, DEFAULT_REPLAY_CAPACITY)
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ActionRequest {
        ActionRequest {
            request_id: "req-1".to_string(),
            policy_id: crate::domain::POLICY_CONFIDENTIAL_PROXY.to_string(),
            action_type: crate::domain::ACTION_CONFIDENTIAL_LLM_CALL.to_string(),
            prompt: Some("[commitment:abc]".to_string()),
            inputs: json!({
                "provider_url": "https://api.anthropic.com/v1/messages",
                "model": "claude-3-haiku-20240307",
                "messages": [{"role": "user", "content": "hi"}]
            }),
            constraints: None,
            llm: None,
        }
    }

    fn build_valid() -> (ActionRequest, Output, Receipt, NodeSigningKey, ReceiptEngine) {
        let engine = ReceiptEngine::default();
        let key = NodeSigningKey::generate();
        let request = sample_request();
        let output = Output::from_text("hello".to_string());
        let receipt = engine
            .build(
                &request,
                &output,
                &key,
                AttestationInfo::none(),
                PaymentInfo::none(),
            )
            .unwrap();
        (request, output, receipt, key, engine)
    }

    #[test]
    fn test_build_then_verify_valid() {
        let (request, output, receipt, _, engine) = build_valid();
        let outcome = engine.verify(&request, &output, &receipt);
        assert!(outcome.valid, "reason: {:?}", outcome.reason);
        assert!(receipt.iat <= receipt.exp);
    }

    #[test]
    fn test_verify_twice_is_replay() {
        let (request, output, receipt, _, engine) = build_valid();
        assert!(engine.verify(&request, &output, &receipt).valid);
        let second = engine.verify(&request, &output, &receipt);
        assert_eq!(second.reason, Some(VerifyReason::ReplayDetected));
    }

    #[test]
    fn test_wrong_schema() {
        let (request, output, mut receipt, _, engine) = build_valid();
        receipt.schema = "vin.receipt.v1".to_string();
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::InvalidSchema)
        );
    }

    #[test]
    fn test_expired_receipt() {
        let (request, output, mut receipt, _, engine) = build_valid();
        // Expiry is checked before the signature, so mutating exp suffices
        receipt.exp = unix_now().saturating_sub(10);
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::Expired)
        );
    }

    #[test]
    fn test_issued_in_future() {
        let (request, output, mut receipt, _, engine) = build_valid();
        receipt.iat = unix_now() + CLOCK_SKEW_SECS + 30;
        receipt.exp = receipt.iat + 600;
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::IssuedInFuture)
        );
    }

    #[test]
    fn test_iat_within_skew_tolerated() {
        let (request, output, receipt, key, engine) = build_valid();
        let mut skewed = receipt.clone();
        skewed.iat = unix_now() + CLOCK_SKEW_SECS - 5;
        skewed.exp = skewed.iat + 600;
        let payload = skewed.signing_payload().unwrap();
        skewed.sig = base64url_encode(&key.sign(&payload));
        assert!(engine.verify(&request, &output, &skewed).valid);
    }

    #[test]
    fn test_mutated_inputs() {
        let (mut request, output, receipt, _, engine) = build_valid();
        request.inputs["model"] = json!("claude-3-opus-20240229");
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::InputsCommitmentMismatch)
        );
    }

    #[test]
    fn test_mutated_clean_text() {
        let (request, mut output, receipt, _, engine) = build_valid();
        output.clean_text.push('!');
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::OutputCleanHashMismatch)
        );
    }

    #[test]
    fn test_mutated_transport_text() {
        let (request, mut output, receipt, _, engine) = build_valid();
        output.text.push('!');
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::OutputTransportHashMismatch)
        );
    }

    #[test]
    fn test_mutated_signature() {
        let (request, output, mut receipt, _, engine) = build_valid();
        let mut sig = base64url_decode(&receipt.sig).unwrap();
        sig[0] ^= 0x01;
        receipt.sig = base64url_encode(&sig);
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::SignatureInvalid)
        );
    }

    #[test]
    fn test_constraints_default_to_empty_object() {
        let (mut request, output, receipt, _, engine) = build_valid();
        // None and an explicit empty object commit identically
        request.constraints = Some(json!({}));
        assert!(engine.verify(&request, &output, &receipt).valid);
    }

    #[test]
    fn test_mutated_constraints() {
        let (mut request, output, receipt, _, engine) = build_valid();
        request.constraints = Some(json!({"max_cost": 1}));
        assert_eq!(
            engine.verify(&request, &output, &receipt).reason,
            Some(VerifyReason::ConstraintsCommitmentMismatch)
        );
    }

    #[test]
    fn test_foreign_key_receipt_rejected() {
        let (request, output, receipt, _, engine) = build_valid();
        let mut forged = receipt.clone();
        let other = NodeSigningKey::generate();
        forged.node_pubkey = base64url_encode(&other.public_key_bytes());
        assert_eq!(
            engine.verify(&request, &output, &forged).reason,
            Some(VerifyReason::SignatureInvalid)
        );
    }

    #[test]
    fn test_nonces_are_unique() {
        let engine = ReceiptEngine::default();
        let key = NodeSigningKey::generate();
        let request = sample_request();
        let output = Output::from_text("x".to_string());
        let a = engine
            .build(&request, &output, &key, AttestationInfo::none(), PaymentInfo::none())
            .unwrap();
        let b = engine
            .build(&request, &output, &key, AttestationInfo::none(), PaymentInfo::none())
            .unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(VerifyReason::InvalidSchema.as_str(), "invalid_schema");
        assert_eq!(
            serde_json::to_string(&VerifyReason::OutputCleanHashMismatch).unwrap(),
            r#""output_clean_hash_mismatch""#
        );
    }
}
