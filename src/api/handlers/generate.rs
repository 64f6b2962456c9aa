//! Confidential inference admission pipeline
//!
//! Order of checks is part of the protocol contract:
//! rate limit → payment gate → body parse → envelope-nonce replay → user key
//! parse → envelope open → schema validation → inputs commitment → outbound
//! call → receipt → sealed response. Rate-limit rejections arrive before any
//! state mutation; payment rejections arrive before body parsing.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::api::error::ApiError;
use crate::crypto::{self, EncryptedEnvelope};
use crate::domain::{
    evaluate_payment, ActionRequest, LlmRequest, Output, PaymentChallenge, PaymentInfo,
    ProviderCompletion, ACTION_CONFIDENTIAL_LLM_CALL, POLICY_CONFIDENTIAL_PROXY,
};
use crate::server::AppState;

/// Query parameters recognized by the generate endpoint
#[derive(Debug, Default, Deserialize)]
pub struct GenerateQuery {
    /// Test-mode payment bypass; ignored unless the node runs in test mode
    #[serde(default)]
    pub paid: Option<String>,
}

/// Request body: either the confidential envelope or the legacy branch
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerateBody {
    // Confidential branch
    encrypted_payload: Option<String>,
    ephemeral_pubkey: Option<String>,
    nonce: Option<String>,
    user_pubkey: Option<String>,

    // Legacy branch (plaintext request, flag-gated)
    request: Option<serde_json::Value>,
}

#[instrument(skip_all, fields(client))]
pub async fn generate(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    // 1. rate limit, before any other work
    let client = crate::infra::ratelimit::client_key(&headers);
    tracing::Span::current().record("client", client.as_str());
    if let Err(retry_after) = state.rate_limiter.check(&client) {
        return Err(ApiError::rate_limited(retry_after));
    }

    // 2. payment gate, before body parsing
    let paid_query = query.paid.as_deref() == Some("true");
    let Some(accepted) = evaluate_payment(&headers, paid_query, state.config.test_mode) else {
        return Err(ApiError::payment_required(PaymentChallenge::new(
            "/v1/generate",
            &state.config.pay_to,
            state.config.price_amount,
            &state.config.network,
        )));
    };
    let payment = accepted.to_payment_info();

    // 3. strict body parse
    if body.len() > state.config.max_input_size {
        return Err(ApiError::invalid_payload("request body too large"));
    }
    let parsed: GenerateBody = serde_json::from_slice(&body)
        .map_err(|_| ApiError::invalid_payload("request body is not valid JSON"))?;

    if parsed.encrypted_payload.is_some() {
        confidential_branch(&state, parsed, payment).await
    } else if parsed.request.is_some() {
        legacy_branch(&state, parsed, payment).await
    } else {
        Err(ApiError::invalid_payload(
            "expected an encrypted envelope or a legacy request",
        ))
    }
}

async fn confidential_branch(
    state: &AppState,
    body: GenerateBody,
    payment: PaymentInfo,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (Some(encrypted_payload), Some(ephemeral_pubkey), Some(nonce), Some(user_pubkey)) = (
        body.encrypted_payload,
        body.ephemeral_pubkey,
        body.nonce,
        body.user_pubkey,
    ) else {
        return Err(ApiError::invalid_payload(
            "missing envelope fields: encrypted_payload, ephemeral_pubkey, nonce, user_pubkey",
        ));
    };

    // 4. request-nonce replay defense before any side effects
    let nonce_bytes = crypto::decode_nonce_hex(&nonce)
        .map_err(|_| ApiError::invalid_payload("malformed envelope nonce"))?;
    let nonce_key = hex::encode(nonce_bytes);
    if !state.request_nonces.insert_if_absent(nonce_key, ()) {
        return Err(ApiError::replay_detected());
    }

    // 5. the response recipient key must be a valid curve point
    let user_key = crypto::parse_public_key_hex(&user_pubkey)
        .map_err(|_| ApiError::invalid_payload("invalid payload"))?;

    // 6. open the envelope; the concrete cryptographic reason stays internal
    let envelope = EncryptedEnvelope {
        ciphertext: encrypted_payload,
        ephemeral_pubkey,
        nonce: nonce.clone(),
    };
    let plaintext = crypto::open(&envelope, state.keys.encryption_secret()).map_err(|e| {
        warn!(error = %e, "envelope open failed");
        ApiError::invalid_payload("invalid payload")
    })?;

    // 7. strict schema validation
    let llm_request: LlmRequest = serde_json::from_slice(&plaintext)
        .map_err(|e| ApiError::invalid_payload(format!("request schema: {e}")))?;
    llm_request.validate().map_err(|errors| {
        ApiError::invalid_payload("request failed validation")
            .with_details(json!({ "errors": errors }))
    })?;

    // 8. inputs commitment over {provider_url, model, messages}; api_key excluded
    let inputs = llm_request.committed_inputs();
    let inputs_commitment =
        crypto::commitment_hex(&inputs).map_err(|_| ApiError::generation_failed())?;

    // 9. outbound call through the SSRF-safe transport
    let completion = state.provider.complete(&llm_request).await.map_err(|e| {
        warn!(error = %e, "provider call failed");
        ApiError::from(e)
    })?;

    // 10-12. output, action request, signed receipt
    let (_output, receipt) =
        issue_receipt(state, inputs, &inputs_commitment, &completion, payment)?;

    // 13. seal the response to the caller, echoing the envelope nonce so the
    // client can bind it to the request it sent
    let response_plaintext = json!({
        "text": completion.text,
        "usage": completion.usage,
        "request_nonce": nonce,
    });
    let response_envelope = crypto::seal(
        &serde_json::to_vec(&response_plaintext).map_err(|_| ApiError::generation_failed())?,
        &user_key,
    )
    .map_err(|_| ApiError::generation_failed())?;

    info!(
        model = %llm_request.model,
        commitment = %inputs_commitment,
        "confidential inference completed"
    );

    Ok(Json(json!({
        "encrypted_response": response_envelope.ciphertext,
        "response_ephemeral_pubkey": response_envelope.ephemeral_pubkey,
        "response_nonce": response_envelope.nonce,
        "receipt": receipt,
    })))
}

async fn legacy_branch(
    state: &AppState,
    body: GenerateBody,
    payment: PaymentInfo,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.config.allow_legacy {
        return Err(ApiError::legacy_mode_disabled());
    }

    let request_value = body
        .request
        .ok_or_else(|| ApiError::invalid_payload("missing request object"))?;
    let llm_request: LlmRequest = serde_json::from_value(request_value)
        .map_err(|e| ApiError::invalid_payload(format!("request schema: {e}")))?;
    llm_request.validate().map_err(|errors| {
        ApiError::invalid_payload("request failed validation")
            .with_details(json!({ "errors": errors }))
    })?;

    let inputs = llm_request.committed_inputs();
    let inputs_commitment =
        crypto::commitment_hex(&inputs).map_err(|_| ApiError::generation_failed())?;

    let completion = state.provider.complete(&llm_request).await.map_err(|e| {
        warn!(error = %e, "provider call failed");
        ApiError::from(e)
    })?;

    let (output, receipt) = issue_receipt(state, inputs, &inputs_commitment, &completion, payment)?;

    Ok(Json(json!({
        "output": output,
        "usage": completion.usage,
        "receipt": receipt,
    })))
}

/// Steps 10-12: build the output and the action request, sign the receipt.
fn issue_receipt(
    state: &AppState,
    inputs: serde_json::Value,
    inputs_commitment: &str,
    completion: &ProviderCompletion,
    payment: PaymentInfo,
) -> Result<(Output, crate::domain::Receipt), ApiError> {
    let output = Output::from_text(completion.text.clone());

    let action_request = ActionRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        policy_id: POLICY_CONFIDENTIAL_PROXY.to_string(),
        action_type: ACTION_CONFIDENTIAL_LLM_CALL.to_string(),
        // The receipt never carries the plaintext; only its commitment
        prompt: Some(format!("[commitment:{inputs_commitment}]")),
        inputs,
        constraints: None,
        llm: None,
    };

    let receipt = state
        .receipt_engine
        .build(
            &action_request,
            &output,
            state.keys.signing(),
            state.attestation.to_receipt_info(),
            payment,
        )
        .map_err(|e| {
            warn!(error = %e, "receipt build failed");
            ApiError::generation_failed()
        })?;

    Ok((output, receipt))
}
