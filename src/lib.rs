//! VIN Node Library
//!
//! Confidential inference proxy that runs inside a TEE: clients seal an LLM
//! request to the node's secp256k1 key, the node opens it, forwards the call
//! to an allowlisted provider, seals the response back to the client, and
//! emits an Ed25519-signed receipt binding a commitment over the request to
//! hashes of the produced text. A sibling Input Sanitization Module (ISM)
//! attests that inputs arrived from approved non-human sources.
//!
//! ## Modules
//!
//! - [`crypto`] - Canonical JSON hashing, ECIES seal/open, Ed25519 signing
//! - [`domain`] - Wire types (LLM requests, receipts, x402 challenges)
//! - [`infra`] - Caches, rate limiting, SSRF-safe outbound, TEE adapter, keys
//! - [`ism`] - Input Sanitization Module
//! - [`api`] - REST API routes and error taxonomy
//! - [`server`] - Configuration and HTTP bootstrap

pub mod api;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod ism;
pub mod server;

// Re-export commonly used types
pub use domain::{
    ActionRequest, AttestationInfo, ChatMessage, LlmRequest, Output, PaymentInfo, Receipt,
};

pub use infra::{
    KeyManager, NodeKeypair, OutboundCaller, RateLimiter, ReceiptEngine, TeeAdapter, TtlCache,
    VerifyOutcome,
};

pub use ism::{ApprovedSource, InputAttestation, InputSanitizationModule, RawInput, SourceType};
