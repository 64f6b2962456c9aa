//! Health check handler

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::server::AppState;

/// Response for the health endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    /// Ed25519 public key, base64url
    pub node_pubkey: String,
    /// Compressed secp256k1 public key, hex
    pub encryption_pubkey: String,
    pub version: &'static str,
    pub x402: bool,
    pub confidential_proxy: bool,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        node_pubkey: state.keys.node_pubkey_b64url(),
        encryption_pubkey: state.keys.encryption_pubkey_hex(),
        version: env!("CARGO_PKG_VERSION"),
        x402: true,
        confidential_proxy: true,
    })
}
