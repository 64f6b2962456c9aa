//! REST API for the VIN node

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;

use crate::server::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/tee-pubkey", get(handlers::attestation::tee_pubkey))
        .route("/v1/policies", get(handlers::policies::policies))
        .route("/v1/attestation", get(handlers::attestation::attestation))
        .route("/v1/generate", post(handlers::generate::generate))
        .route("/v1/verify", post(handlers::verify::verify))
}
