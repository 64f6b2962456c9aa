//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::json;

use vin_node::crypto::{self, EncryptedEnvelope};
use vin_node::domain::{LlmRequest, ProviderCompletion, TokenUsage};
use vin_node::infra::{Attestation, NodeKeypair, OutboundError, ProviderTransport};
use vin_node::server::{AppState, Config};

/// What the stub transport should answer with
pub enum StubReply {
    Text(ProviderCompletion),
    Status(u16),
    Timeout,
}

/// A provider transport double: records the requests it saw and returns a
/// canned completion (or error) without touching the network.
pub struct StubProvider {
    pub reply: Mutex<StubReply>,
    pub calls: Mutex<Vec<LlmRequest>>,
}

impl StubProvider {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(StubReply::Text(ProviderCompletion {
                text: text.to_string(),
                model: "claude-3-haiku-20240307".to_string(),
                usage: TokenUsage {
                    input_tokens: Some(3),
                    output_tokens: Some(7),
                },
            })),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reply: StubReply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ProviderTransport for StubProvider {
    async fn complete(&self, request: &LlmRequest) -> Result<ProviderCompletion, OutboundError> {
        // Mirror the real transport: the URL is policy-checked before any
        // socket would be opened
        vin_node::infra::outbound::validate_provider_url(&request.provider_url)?;
        self.calls.lock().unwrap().push(request.clone());
        match &*self.reply.lock().unwrap() {
            StubReply::Text(completion) => Ok(completion.clone()),
            StubReply::Status(status) => Err(OutboundError::UpstreamStatus(*status)),
            StubReply::Timeout => Err(OutboundError::Timeout),
        }
    }
}

/// Build test state around a stub provider. The node's public keys are
/// readable through `state.keys`.
pub fn test_state(config: Config, provider: Arc<StubProvider>) -> AppState {
    AppState::new(
        config,
        NodeKeypair::generate(),
        Attestation::none(),
        provider,
    )
}

/// Default test configuration: test mode on, tiny price.
pub fn test_config() -> Config {
    Config {
        test_mode: true,
        pay_to: "0x1111111111111111111111111111111111111111".to_string(),
        price_amount: 10_000,
        ..Config::default()
    }
}

/// Seal an LLM request body to the node's encryption key the way a client
/// would, returning the generate-endpoint body and the client's secret key
/// for opening the response.
pub fn seal_request(
    node_encryption_pubkey_hex: &str,
    request: &serde_json::Value,
) -> (serde_json::Value, k256::SecretKey) {
    let node_key = crypto::parse_public_key_hex(node_encryption_pubkey_hex).unwrap();
    let envelope = crypto::seal(&serde_json::to_vec(request).unwrap(), &node_key).unwrap();

    let (client_secret, client_public) = crypto::generate_encryption_keypair();
    let body = json!({
        "encrypted_payload": envelope.ciphertext,
        "ephemeral_pubkey": envelope.ephemeral_pubkey,
        "nonce": envelope.nonce,
        "user_pubkey": crypto::public_key_hex(&client_public),
    });
    (body, client_secret)
}

/// Open the sealed response from the generate endpoint.
pub fn open_response(
    response_body: &serde_json::Value,
    client_secret: &k256::SecretKey,
) -> serde_json::Value {
    let envelope = EncryptedEnvelope {
        ciphertext: response_body["encrypted_response"].as_str().unwrap().to_string(),
        ephemeral_pubkey: response_body["response_ephemeral_pubkey"]
            .as_str()
            .unwrap()
            .to_string(),
        nonce: response_body["response_nonce"].as_str().unwrap().to_string(),
    };
    let plaintext = crypto::open(&envelope, client_secret).unwrap();
    serde_json::from_slice(&plaintext).unwrap()
}

/// A well-formed confidential LLM request plaintext.
pub fn sample_llm_request() -> serde_json::Value {
    json!({
        "provider_url": "https://api.anthropic.com/v1/messages",
        "api_key": "sk-secret",
        "model": "claude-3-haiku-20240307",
        "messages": [{"role": "user", "content": "hi"}]
    })
}

/// POST a JSON value to a router path with optional headers.
pub fn json_request(
    path: &str,
    body: &serde_json::Value,
    headers: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Read a response body as JSON.
pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
