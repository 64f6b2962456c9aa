//! SSRF-safe outbound provider caller
//!
//! Every provider URL is validated before any socket is opened:
//! 1. scheme must be `https`
//! 2. the host must be on the compile-time allowlist (no env override)
//! 3. the host resolves through a pinned A-record cache (TTL 60 s)
//! 4. the resolved address must not fall in a private, loopback, link-local,
//!    CGNAT, or metadata range; IPv4-mapped IPv6 is unwrapped and re-checked
//! 5. the connection uses the pinned address, closing the rebinding window
//!    between check and connect
//!
//! Providers are detected by host substring and their responses normalized
//! to a provider-independent `{text, model, usage}` shape.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use serde_json::json;
use tracing::{debug, warn};

use super::cache::TtlCache;
use crate::domain::{LlmRequest, ProviderCompletion, Role, TokenUsage};

/// Hosts the proxy may contact. Mutable only by source change.
pub const ALLOWED_PROVIDER_HOSTS: [&str; 9] = [
    "api.openai.com",
    "api.anthropic.com",
    "api.together.xyz",
    "api.groq.com",
    "generativelanguage.googleapis.com",
    "api.mistral.ai",
    "api.perplexity.ai",
    "api.deepseek.com",
    "openrouter.ai",
];

/// Overall provider-call deadline
const PROVIDER_DEADLINE: Duration = Duration::from_secs(120);

/// DNS resolution deadline
const DNS_DEADLINE: Duration = Duration::from_secs(5);

/// DNS pin lifetime
const DNS_PIN_TTL: Duration = Duration::from_secs(60);

/// Headers a client-supplied header map may not override
const RESERVED_HEADERS: [&str; 6] = [
    "authorization",
    "x-api-key",
    "anthropic-version",
    "host",
    "content-type",
    "content-length",
];

/// Error type for outbound calls
#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("invalid provider URL")]
    InvalidUrl,

    #[error("provider URL scheme must be https")]
    SchemeNotHttps,

    #[error("host not in allowlist")]
    HostNotAllowed,

    #[error("resolved address is in a blocked range")]
    BlockedAddress,

    #[error("DNS resolution failed: {0}")]
    Resolution(String),

    #[error("upstream timeout")]
    Timeout,

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected provider response shape")]
    MalformedResponse,
}

/// Provider wire dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAiCompatible,
}

impl ProviderKind {
    /// Detect the dialect from the host. Unknown providers speak the
    /// OpenAI-compatible shape.
    pub fn detect(host: &str) -> Self {
        if host.contains("anthropic.com") {
            Self::Anthropic
        } else {
            Self::OpenAiCompatible
        }
    }
}

/// Whether an address falls in a range the proxy must never contact.
pub fn is_blocked_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            a == 0                                  // 0/8
                || a == 10                          // 10/8
                || (a == 100 && (b & 0xc0) == 64)   // 100.64/10 CGNAT
                || a == 127                         // 127/8
                || (a == 169 && b == 254)           // 169.254/16 link-local, metadata
                || (a == 172 && (16..=31).contains(&b)) // 172.16/12
                || (a == 192 && b == 168)           // 192.168/16
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(mapped));
            }
            let segments = v6.segments();
            v6.is_unspecified()
                || v6.is_loopback()
                || (segments[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
                || (segments[0] & 0xfe00) == 0xfc00 // fc00::/7 ULA
        }
    }
}

/// Parse and policy-check a provider URL without touching the network.
pub fn validate_provider_url(raw: &str) -> Result<url::Url, OutboundError> {
    let parsed = url::Url::parse(raw).map_err(|_| OutboundError::InvalidUrl)?;

    if parsed.scheme() != "https" {
        return Err(OutboundError::SchemeNotHttps);
    }

    let host = parsed
        .host_str()
        .ok_or(OutboundError::InvalidUrl)?
        .to_ascii_lowercase();

    if !ALLOWED_PROVIDER_HOSTS.contains(&host.as_str()) {
        return Err(OutboundError::HostNotAllowed);
    }

    Ok(parsed)
}

/// SSRF-safe caller with a pinned DNS cache.
pub struct OutboundCaller {
    dns_pins: TtlCache<String, IpAddr>,
}

impl OutboundCaller {
    pub fn new() -> Self {
        Self {
            dns_pins: TtlCache::new(256, DNS_PIN_TTL),
        }
    }

    /// Pin a host to an address for the pin TTL. Normally populated by
    /// resolution; exposed so tests can control the resolver.
    pub fn pin(&self, host: &str, addr: IpAddr) {
        self.dns_pins.insert(host.to_ascii_lowercase(), addr);
    }

    /// Resolve a host through the pin cache, rejecting blocked ranges.
    pub async fn resolve_pinned(&self, host: &str) -> Result<IpAddr, OutboundError> {
        let key = host.to_ascii_lowercase();

        if let Some(pinned) = self.dns_pins.get(&key) {
            if is_blocked_ip(pinned) {
                return Err(OutboundError::BlockedAddress);
            }
            return Ok(pinned);
        }

        let mut addrs = tokio::time::timeout(DNS_DEADLINE, tokio::net::lookup_host((host, 443)))
            .await
            .map_err(|_| OutboundError::Resolution("timed out".to_string()))?
            .map_err(|e| OutboundError::Resolution(e.to_string()))?;

        let ip = addrs
            .next()
            .map(|sa: SocketAddr| sa.ip())
            .ok_or_else(|| OutboundError::Resolution("no addresses".to_string()))?;

        if is_blocked_ip(ip) {
            return Err(OutboundError::BlockedAddress);
        }

        self.dns_pins.insert(key, ip);
        Ok(ip)
    }

    /// Validate, resolve, and issue the provider call.
    pub async fn call(&self, request: &LlmRequest) -> Result<ProviderCompletion, OutboundError> {
        let url = validate_provider_url(&request.provider_url)?;
        let host = url
            .host_str()
            .ok_or(OutboundError::InvalidUrl)?
            .to_ascii_lowercase();
        let port = url.port().unwrap_or(443);

        let ip = self.resolve_pinned(&host).await?;
        let provider = ProviderKind::detect(&host);
        debug!(%host, ?provider, "issuing provider call");

        // The resolve override forces the connection onto the pinned address
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_DEADLINE)
            .resolve(&host, SocketAddr::new(ip, port))
            .build()
            .map_err(|e| OutboundError::Transport(e.to_string()))?;

        let mut builder = match provider {
            ProviderKind::Anthropic => client
                .post(url.clone())
                .header("x-api-key", &request.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&anthropic_body(request)),
            ProviderKind::OpenAiCompatible => client
                .post(url.clone())
                .header(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", request.api_key),
                )
                .json(&openai_body(request)),
        };

        for (name, value) in &request.headers {
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => warn!(header = %name, "skipping malformed custom header"),
            }
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                OutboundError::Timeout
            } else {
                OutboundError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OutboundError::UpstreamStatus(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OutboundError::Timeout
            } else {
                OutboundError::Transport(e.to_string())
            }
        })?;

        parse_completion(provider, &request.model, &body)
    }
}

impl Default for OutboundCaller {
    fn default() -> Self {
        Self::new()
    }
}

/// Seam between the admission pipeline and the provider transport, so tests
/// can substitute a stub for the network.
#[async_trait::async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<ProviderCompletion, OutboundError>;
}

#[async_trait::async_trait]
impl ProviderTransport for OutboundCaller {
    async fn complete(&self, request: &LlmRequest) -> Result<ProviderCompletion, OutboundError> {
        self.call(request).await
    }
}

fn anthropic_body(request: &LlmRequest) -> serde_json::Value {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    let mut body = json!({
        "model": &request.model,
        "max_tokens": request.max_tokens.unwrap_or(1024),
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n"));
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn openai_body(request: &LlmRequest) -> serde_json::Value {
    let mut body = json!({
        "model": &request.model,
        "messages": &request.messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

/// Normalize a provider response body.
pub fn parse_completion(
    provider: ProviderKind,
    requested_model: &str,
    body: &serde_json::Value,
) -> Result<ProviderCompletion, OutboundError> {
    match provider {
        ProviderKind::Anthropic => {
            let blocks = body
                .get("content")
                .and_then(|c| c.as_array())
                .ok_or(OutboundError::MalformedResponse)?;
            let text: String = blocks
                .iter()
                .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                .collect();

            Ok(ProviderCompletion {
                text,
                model: body
                    .get("model")
                    .and_then(|m| m.as_str())
                    .unwrap_or(requested_model)
                    .to_string(),
                usage: TokenUsage {
                    input_tokens: body
                        .pointer("/usage/input_tokens")
                        .and_then(|v| v.as_u64()),
                    output_tokens: body
                        .pointer("/usage/output_tokens")
                        .and_then(|v| v.as_u64()),
                },
            })
        }
        ProviderKind::OpenAiCompatible => {
            let text = body
                .pointer("/choices/0/message/content")
                .and_then(|v| v.as_str())
                .ok_or(OutboundError::MalformedResponse)?
                .to_string();

            Ok(ProviderCompletion {
                text,
                model: body
                    .get("model")
                    .and_then(|m| m.as_str())
                    .unwrap_or(requested_model)
                    .to_string(),
                usage: TokenUsage {
                    input_tokens: body
                        .pointer("/usage/prompt_tokens")
                        .and_then(|v| v.as_u64()),
                    output_tokens: body
                        .pointer("/usage/completion_tokens")
                        .and_then(|v| v.as_u64()),
                },
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
