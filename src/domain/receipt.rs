//! Receipt and action-request wire types
//!
//! A receipt binds a commitment over the request to hashes of the produced
//! text, signed by the node's Ed25519 key. The signed bytes are the JCS form
//! of the receipt object with `sig` removed, so any implementation holding
//! the receipt can verify it without this crate.

use serde::{Deserialize, Serialize};

use crate::crypto::{jcs, CanonicalError};

/// Receipt schema identifier
pub const RECEIPT_SCHEMA: &str = "vin.receipt.v0";

/// Receipt format version
pub const RECEIPT_VERSION: &str = "0.1";

/// Policy id for the confidential proxy action
pub const POLICY_CONFIDENTIAL_PROXY: &str = "P2_CONFIDENTIAL_PROXY_V1";

/// Action type for a confidential inference call
pub const ACTION_CONFIDENTIAL_LLM_CALL: &str = "confidential_llm_call";

/// Attestation sub-object stamped into receipts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationInfo {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<String>,
}

impl AttestationInfo {
    pub fn none() -> Self {
        Self {
            kind: "none".to_string(),
            report_hash: None,
            measurement: None,
        }
    }
}

impl Default for AttestationInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// Payment sub-object recording accepted payment evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_ref: Option<String>,

    /// SHA-256 over the accepted payment header value, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_commitment: Option<String>,
}

impl PaymentInfo {
    pub fn none() -> Self {
        Self {
            kind: "none".to_string(),
            payment_ref: None,
            payment_commitment: None,
        }
    }
}

impl Default for PaymentInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// Signed receipt. Immutable once built; all commitment and hash fields are
/// lowercase hex SHA-256, `nonce` and `sig` are base64url without padding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub schema: String,
    pub version: String,

    /// Node Ed25519 public key, base64url
    pub node_pubkey: String,

    pub request_id: String,
    pub action_type: String,
    pub policy_id: String,

    pub inputs_commitment: String,
    pub constraints_commitment: String,
    pub llm_commitment: String,

    pub output_clean_hash: String,
    pub output_transport_hash: String,

    /// Issue time, unix seconds
    pub iat: u64,
    /// Expiry, unix seconds; `iat <= exp`
    pub exp: u64,

    /// 16 random bytes, base64url
    pub nonce: String,

    pub attestation: AttestationInfo,
    pub payment: PaymentInfo,

    /// Ed25519 signature over the canonical payload, base64url
    pub sig: String,
}

impl Receipt {
    /// Canonical signed bytes: the receipt object minus `sig`, JCS-encoded.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| CanonicalError::Unrepresentable(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.remove("sig");
        }
        jcs(&value)
    }
}

/// The request side of a receipt: what the node committed to having acted on.
///
/// For confidential calls `inputs` carries the committed subset of the
/// decrypted request and `prompt` carries only `[commitment:HEX]`, never the
/// plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub request_id: String,
    pub policy_id: String,
    pub action_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    pub inputs: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<serde_json::Value>,
}

/// Produced output. `text` is the transport form, `clean_text` the cleaned
/// form; for the proxy the two coincide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub text: String,
    pub clean_text: String,
}

impl Output {
    pub fn from_text(text: String) -> Self {
        Self {
            clean_text: text.clone(),
            text,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_receipt() -> Receipt {
        Receipt {
            schema: RECEIPT_SCHEMA.to_string(),
            version: RECEIPT_VERSION.to_string(),
            node_pubkey: "cHVia2V5".to_string(),
            request_id: "req-1".to_string(),
            action_type: ACTION_CONFIDENTIAL_LLM_CALL.to_string(),
            policy_id: POLICY_CONFIDENTIAL_PROXY.to_string(),
            inputs_commitment: "aa".repeat(32),
            constraints_commitment: "bb".repeat(32),
            llm_commitment: "cc".repeat(32),
            output_clean_hash: "dd".repeat(32),
            output_transport_hash: "ee".repeat(32),
            iat: 1_700_000_000,
            exp: 1_700_000_600,
            nonce: "bm9uY2Utbm9uY2UtMTY".to_string(),
            attestation: AttestationInfo::none(),
            payment: PaymentInfo::none(),
            sig: "c2ln".to_string(),
        }
    }

    #[test]
    fn test_signing_payload_excludes_sig() {
        let receipt = sample_receipt();
        let payload = receipt.signing_payload().unwrap();
        let text = String::from_utf8(payload).unwrap();
        assert!(!text.contains(r#""sig""#));
        assert!(text.contains(r#""schema":"vin.receipt.v0""#));
    }

    #[test]
    fn test_signing_payload_independent_of_sig_value() {
        let mut a = sample_receipt();
        let mut b = sample_receipt();
        a.sig = "AAAA".to_string();
        b.sig = "BBBB".to_string();
        assert_eq!(a.signing_payload().unwrap(), b.signing_payload().unwrap());
    }

    #[test]
    fn test_receipt_wire_roundtrip() {
        let receipt = sample_receipt();
        let encoded = serde_json::to_string(&receipt).unwrap();
        let decoded: Receipt = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.signing_payload().unwrap(), receipt.signing_payload().unwrap());
        // The sub-object discriminators use the protocol name `type`
        assert!(encoded.contains(r#""attestation":{"type":"none"}"#));
    }

    #[test]
    fn test_action_request_optional_sections() {
        let request: ActionRequest = serde_json::from_value(serde_json::json!({
            "request_id": "r",
            "policy_id": POLICY_CONFIDENTIAL_PROXY,
            "action_type": ACTION_CONFIDENTIAL_LLM_CALL,
            "inputs": {"model": "m"}
        }))
        .unwrap();
        assert!(request.constraints.is_none());
        assert!(request.llm.is_none());
    }
}
