//! Attestation and key-disclosure handlers

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::server::AppState;

/// `GET /v1/attestation` - the attestation captured at startup.
pub async fn attestation(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.attestation.as_ref()).unwrap_or_else(|_| json!({})))
}

/// `GET /v1/tee-pubkey` - both public keys plus the startup attestation, so
/// a client can seal requests and pin the node identity in one round trip.
pub async fn tee_pubkey(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "encryption_pubkey": state.keys.encryption_pubkey_hex(),
        "signing_pubkey": state.keys.node_pubkey_b64url(),
        "attestation": state.attestation.as_ref(),
    }))
}
