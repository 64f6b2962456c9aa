//! x402 payment challenge and acceptance
//!
//! An unauthenticated request to the paid endpoint receives a structured 402
//! challenge: a JSON body enumerating accepted payment requirements plus a
//! `PAYMENT-REQUIRED` header carrying the same body base64-encoded for buyers
//! that only inspect headers.
//!
//! Acceptance records evidence only; settlement verification belongs to an
//! external facilitator. The accepted header value is committed into the
//! receipt as `sha256(utf8(header_value))`.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::PaymentInfo;
use crate::crypto::{base64_encode, hash_hex, sha256};

/// Protocol version carried in the challenge body
pub const X402_VERSION: u32 = 2;

/// Challenge header name (base64 copy of the JSON body)
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";

/// Preferred payment evidence header (v2)
pub const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";

/// Fallback payment evidence header (v1)
pub const X_PAYMENT_HEADER: &str = "x-payment";

/// USDC on Base, the default settlement asset
pub const BASE_USDC_ADDRESS: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// Default settlement network in CAIP-2 form (Base mainnet)
pub const DEFAULT_NETWORK: &str = "eip155:8453";

/// One accepted payment scheme
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequirements {
    pub scheme: String,

    /// CAIP-2 network identifier, e.g. `eip155:8453`
    pub network: String,

    /// Price in minor units of the asset
    pub amount: u64,

    /// On-chain asset address
    pub asset: String,

    #[serde(rename = "payTo")]
    pub pay_to: String,

    #[serde(rename = "maxTimeoutSeconds")]
    pub max_timeout_seconds: u64,

    pub extra: PaymentExtra,
}

/// Asset metadata needed by buyers to build the transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentExtra {
    #[serde(rename = "assetTransferMethod")]
    pub asset_transfer_method: String,
    pub name: String,
    pub version: String,
}

/// The paywalled resource being offered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub url: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Full 402 challenge body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChallenge {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    pub resource: ResourceInfo,
    pub accepts: Vec<PaymentRequirements>,
}

impl PaymentChallenge {
    /// Build the challenge for the generate endpoint.
    pub fn new(resource_url: &str, pay_to: &str, amount: u64, network: &str) -> Self {
        Self {
            x402_version: X402_VERSION,
            resource: ResourceInfo {
                url: resource_url.to_string(),
                description: "Confidential LLM inference with signed receipt".to_string(),
                mime_type: "application/json".to_string(),
            },
            accepts: vec![PaymentRequirements {
                scheme: "exact".to_string(),
                network: network.to_string(),
                amount,
                asset: BASE_USDC_ADDRESS.to_string(),
                pay_to: pay_to.to_string(),
                max_timeout_seconds: 300,
                extra: PaymentExtra {
                    asset_transfer_method: "eip3009".to_string(),
                    name: "USDC".to_string(),
                    version: "2".to_string(),
                },
            }],
        }
    }

    /// Base64 copy of the JSON body for the `PAYMENT-REQUIRED` header.
    pub fn header_value(&self) -> String {
        let body = serde_json::to_vec(self).unwrap_or_default();
        base64_encode(&body)
    }
}

/// Evidence that satisfied the payment gate
#[derive(Debug, Clone)]
pub struct AcceptedPayment {
    pub payment_ref: String,
    pub payment_commitment: Option<String>,
}

impl AcceptedPayment {
    pub fn to_payment_info(&self) -> PaymentInfo {
        PaymentInfo {
            kind: if self.payment_commitment.is_some() {
                "x402".to_string()
            } else {
                "test_mode".to_string()
            },
            payment_ref: Some(self.payment_ref.clone()),
            payment_commitment: self.payment_commitment.clone(),
        }
    }
}

/// Commitment over accepted payment evidence.
pub fn payment_commitment(header_value: &str) -> String {
    hash_hex(&sha256(header_value.as_bytes()))
}

/// Evaluate payment evidence in the protocol's acceptance order:
/// `PAYMENT-SIGNATURE`, then `X-Payment`, then (test mode only) `?paid=true`.
pub fn evaluate_payment(
    headers: &HeaderMap,
    paid_query: bool,
    test_mode: bool,
) -> Option<AcceptedPayment> {
    for header in [PAYMENT_SIGNATURE_HEADER, X_PAYMENT_HEADER] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return Some(AcceptedPayment {
                    payment_ref: header.to_string(),
                    payment_commitment: Some(payment_commitment(value)),
                });
            }
        }
    }

    if test_mode && paid_query {
        return Some(AcceptedPayment {
            payment_ref: "paid_query".to_string(),
            payment_commitment: None,
        });
    }

    None
}

// ============================================================================
// Tests
// ============================================================================
