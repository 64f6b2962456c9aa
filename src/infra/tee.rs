//! Platform-agent RPC adapter
//!
//! Thin wrapper over the TEE platform's local HTTP agent. Three operations:
//! attestation, key derivation, and a liveness probe. Calls carry a short
//! deadline and are never retried; every failure collapses to
//! `Attestation::none()` and the caller decides whether that is fatal.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::crypto::{hash_hex, sha256};
use crate::domain::AttestationInfo;

/// RPC deadline for every platform-agent call
const RPC_DEADLINE: Duration = Duration::from_secs(10);

/// Structured attestation from the platform agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(rename = "type")]
    pub kind: String,

    pub available: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_pubkey: Option<String>,
}

impl Attestation {
    /// The stub returned when no platform agent is reachable.
    pub fn none() -> Self {
        Self {
            kind: "none".to_string(),
            available: false,
            report: None,
            measurement: None,
            signer_pubkey: None,
        }
    }

    /// Condense into the receipt sub-object: the raw report is replaced by
    /// its hash so receipts stay small.
    pub fn to_receipt_info(&self) -> AttestationInfo {
        AttestationInfo {
            kind: self.kind.clone(),
            report_hash: self
                .report
                .as_ref()
                .map(|report| hash_hex(&sha256(report.as_bytes()))),
            measurement: self.measurement.clone(),
        }
    }
}

/// Client for the platform agent's local HTTP endpoint.
pub struct TeeAdapter {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl TeeAdapter {
    /// `base_url = None` models a host without a platform agent; every
    /// operation degrades the same way a dead agent would.
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_DEADLINE)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    /// Whether the platform agent answers its liveness probe.
    pub async fn available(&self) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };
        match self.client.get(format!("{base}/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "platform agent probe failed");
                false
            }
        }
    }

    /// Derive a 32-byte secret for a label, or `None` when derivation is
    /// unavailable or the agent misbehaves.
    pub async fn derive_key(&self, path: &str) -> Option<[u8; 32]> {
        let base = self.base_url.as_ref()?;

        let response = self
            .client
            .post(format!("{base}/derive_key"))
            .json(&json!({"path": path}))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            warn!(status = %response.status(), path, "derive_key rejected");
            return None;
        }

        #[derive(Deserialize)]
        struct DeriveKeyResponse {
            key: String,
        }
        let body: DeriveKeyResponse = response.json().await.ok()?;
        let bytes = hex::decode(&body.key).ok()?;
        if bytes.len() < 32 {
            warn!(path, "derive_key returned short key material");
            return None;
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        Some(seed)
    }

    /// Request an attestation over `report_data`, optionally binding a
    /// public key. Any failure maps to the `none` stub.
    pub async fn attestation(
        &self,
        report_data: &[u8],
        binding_pubkey: Option<&[u8]>,
    ) -> Attestation {
        let Some(base) = &self.base_url else {
            return Attestation::none();
        };

        let mut request = json!({"report_data": hex::encode(report_data)});
        if let Some(pubkey) = binding_pubkey {
            request["binding_pubkey"] = json!(hex::encode(pubkey));
        }

        let response = match self
            .client
            .post(format!("{base}/attestation"))
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "attestation request rejected");
                return Attestation::none();
            }
            Err(e) => {
                warn!(error = %e, "attestation request failed");
                return Attestation::none();
            }
        };

        match response.json::<Attestation>().await {
            Ok(attestation) => attestation,
            Err(e) => {
                warn!(error = %e, "attestation response malformed");
                Attestation::none()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
