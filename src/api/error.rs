//! Client-facing error taxonomy
//!
//! Every failure a client can observe maps to one stable snake_case kind.
//! Cryptographic failures (bad point, bad tag, failed schema, unparseable
//! body) all collapse into `invalid_payload` so the failure modes are not
//! distinguishable from outside. Payment rejection is special-cased: its
//! body is the x402 challenge itself, with a base64 copy in the
//! `PAYMENT-REQUIRED` header.

use axum::http::{header::RETRY_AFTER, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{PaymentChallenge, PAYMENT_REQUIRED_HEADER};
use crate::infra::OutboundError;

/// Stable error kinds surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    PaymentRequired,
    InvalidPayload,
    ReplayDetected,
    LegacyModeDisabled,
    UpstreamError,
    UpstreamTimeout,
    GenerationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::PaymentRequired => "payment_required",
            Self::InvalidPayload => "invalid_payload",
            Self::ReplayDetected => "replay_detected",
            Self::LegacyModeDisabled => "legacy_mode_disabled",
            Self::UpstreamError => "upstream_error",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::GenerationFailed => "generation_failed",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            Self::InvalidPayload => StatusCode::BAD_REQUEST,
            Self::ReplayDetected => StatusCode::BAD_REQUEST,
            Self::LegacyModeDisabled => StatusCode::BAD_REQUEST,
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::GenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized error envelope
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetails<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetails<'a> {
    kind: ErrorKind,
    message: &'a str,

    /// Numeric status of an upstream provider failure
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a serde_json::Value>,
}

/// A client-visible API error.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    upstream_status: Option<u16>,
    retry_after: Option<u64>,
    details: Option<serde_json::Value>,
    challenge: Option<Box<PaymentChallenge>>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            upstream_status: None,
            retry_after: None,
            details: None,
            challenge: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        let mut error = Self::new(ErrorKind::RateLimited, "rate limit exceeded");
        error.retry_after = Some(retry_after);
        error
    }

    /// The 402 response; its body is the challenge, not the error envelope.
    pub fn payment_required(challenge: PaymentChallenge) -> Self {
        let mut error = Self::new(ErrorKind::PaymentRequired, "payment required");
        error.challenge = Some(Box::new(challenge));
        error
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPayload, message)
    }

    pub fn replay_detected() -> Self {
        Self::new(ErrorKind::ReplayDetected, "replay detected")
    }

    pub fn legacy_mode_disabled() -> Self {
        Self::new(
            ErrorKind::LegacyModeDisabled,
            "legacy requests are disabled on this node",
        )
    }

    pub fn generation_failed() -> Self {
        Self::new(ErrorKind::GenerationFailed, "generation failed")
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<OutboundError> for ApiError {
    fn from(err: OutboundError) -> Self {
        match err {
            // Pre-connect policy rejections: the sealed request named a URL
            // the proxy will never contact
            OutboundError::InvalidUrl
            | OutboundError::SchemeNotHttps
            | OutboundError::HostNotAllowed
            | OutboundError::BlockedAddress => Self::invalid_payload(err.to_string()),

            OutboundError::Timeout => Self::new(ErrorKind::UpstreamTimeout, "upstream timeout"),

            OutboundError::UpstreamStatus(status) => {
                let mut error = Self::new(
                    ErrorKind::UpstreamError,
                    format!("provider returned status {status}"),
                );
                error.upstream_status = Some(status);
                error
            }

            OutboundError::Resolution(_)
            | OutboundError::Transport(_)
            | OutboundError::MalformedResponse => {
                Self::new(ErrorKind::UpstreamError, "provider call failed")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(challenge) = self.challenge {
            let header_value = challenge.header_value();
            let mut response =
                (StatusCode::PAYMENT_REQUIRED, Json(*challenge)).into_response();
            if let Ok(value) = HeaderValue::from_str(&header_value) {
                response
                    .headers_mut()
                    .insert(PAYMENT_REQUIRED_HEADER, value);
            }
            return response;
        }

        let status = self.kind.http_status();
        let body = ErrorBody {
            error: ErrorDetails {
                kind: self.kind,
                message: &self.message,
                status: self.upstream_status,
                retry_after: self.retry_after,
                details: self.details.as_ref(),
            },
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

// ============================================================================
// Tests
// ============================================================================
