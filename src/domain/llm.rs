//! Decrypted LLM request schema and strict validation
//!
//! The decrypted payload is the most sensitive object in the system: it
//! carries the client's provider API key. The key is excluded from the
//! inputs commitment, redacted from `Debug`, and never echoed in validation
//! errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Maximum byte length of a single message content
pub const MAX_MESSAGE_CONTENT_BYTES: usize = 1024 * 1024;

/// Maximum number of messages per request
pub const MAX_MESSAGES: usize = 100;

/// Maximum accepted `max_tokens`
pub const MAX_MAX_TOKENS: u64 = 100_000;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the ordered message sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Decrypted confidential inference request.
///
/// Unknown fields are rejected so that a sealed payload cannot smuggle
/// attributes past validation.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmRequest {
    /// Third-party provider endpoint, must be HTTPS and on the allowlist
    pub provider_url: String,

    /// Provider API key; opaque, redacted everywhere
    pub api_key: String,

    /// Model identifier, non-empty
    pub model: String,

    /// Ordered chat messages, 1..=100 entries
    pub messages: Vec<ChatMessage>,

    /// Optional completion cap, 1..=100000
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// Optional sampling temperature, 0..=2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Extra headers forwarded to the provider
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl LlmRequest {
    /// Strict schema validation per the protocol limits.
    ///
    /// Returned messages name fields only; the api key value never appears.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.provider_url) {
            Ok(parsed) => {
                if parsed.scheme() != "https" {
                    errors.push("provider_url: scheme must be https".to_string());
                }
                if parsed.host_str().is_none() {
                    errors.push("provider_url: missing host".to_string());
                }
            }
            Err(_) => errors.push("provider_url: not a valid URL".to_string()),
        }

        if self.api_key.is_empty() {
            errors.push("api_key: must not be empty".to_string());
        }

        if self.model.trim().is_empty() {
            errors.push("model: must not be empty".to_string());
        }

        if self.messages.is_empty() {
            errors.push("messages: must not be empty".to_string());
        } else if self.messages.len() > MAX_MESSAGES {
            errors.push(format!("messages: more than {MAX_MESSAGES} entries"));
        }
        for (i, message) in self.messages.iter().enumerate() {
            if message.content.len() > MAX_MESSAGE_CONTENT_BYTES {
                errors.push(format!("messages[{i}].content: exceeds 1 MB"));
            }
        }

        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 || max_tokens > MAX_MAX_TOKENS {
                errors.push(format!("max_tokens: must be 1..={MAX_MAX_TOKENS}"));
            }
        }

        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
                errors.push("temperature: must be within 0..=2".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The committed subset of the request: `{provider_url, model, messages}`.
    ///
    /// The api key is excluded so a third party holding the plaintext request
    /// minus the secret can reproduce the commitment.
    pub fn committed_inputs(&self) -> serde_json::Value {
        json!({
            "provider_url": &self.provider_url,
            "model": &self.model,
            "messages": &self.messages,
        })
    }
}

impl std::fmt::Debug for LlmRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRequest")
            .field("provider_url", &self.provider_url)
            .field("api_key", &"[redacted]")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Normalized provider token usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Provider response mapped to a provider-independent shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCompletion {
    pub text: String,
    pub model: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

// ============================================================================
// Tests
// ============================================================================
