//! Infrastructure for the VIN node
//!
//! In-process state and outward-facing adapters:
//! - [`cache`] - bounded LRU cache with TTL (replay maps, DNS pins)
//! - [`ratelimit`] - per-client token bucket
//! - [`outbound`] - SSRF-safe provider caller
//! - [`tee`] - platform-agent RPC adapter
//! - [`keys`] - node keypair resolution
//! - [`receipt_engine`] - receipt build/sign/verify with replay defense

pub mod cache;
pub mod keys;
pub mod outbound;
pub mod ratelimit;
pub mod receipt_engine;
pub mod tee;

pub use cache::TtlCache;
pub use keys::{KeyError, KeyManager, KeySource, NodeKeypair};
pub use outbound::{
    OutboundCaller, OutboundError, ProviderKind, ProviderTransport, ALLOWED_PROVIDER_HOSTS,
};
pub use ratelimit::RateLimiter;
pub use receipt_engine::{ReceiptEngine, VerifyOutcome, VerifyReason};
pub use tee::{Attestation, TeeAdapter};
