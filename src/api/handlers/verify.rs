//! Receipt verification endpoint

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::instrument;

use crate::api::error::ApiError;
use crate::domain::{ActionRequest, Output, Receipt};
use crate::infra::VerifyOutcome;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct VerifyBody {
    request: ActionRequest,
    output: Output,
    receipt: Receipt,
}

/// `POST /v1/verify` - verify a `(request, output, receipt)` triple.
///
/// Verification mutates the replay cache: the first verify of a receipt
/// records its nonce, the second reports `replay_detected`.
#[instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<VerifyOutcome>, ApiError> {
    let body: VerifyBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_payload(format!("verify body: {e}")))?;

    let outcome = state
        .receipt_engine
        .verify(&body.request, &body.output, &body.receipt);
    Ok(Json(outcome))
}
