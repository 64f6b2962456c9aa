//! Cryptographic utilities for the VIN node
//!
//! Provides:
//! - Canonical JSON hashing (RFC 8785, deterministic, cross-language compatible)
//! - ECIES envelope encryption (secp256k1 ECDH + HKDF-SHA256 + AES-256-GCM)
//! - Node signing (Ed25519)

mod ecies;
mod hash;
mod signing;

pub use ecies::*;
pub use hash::*;
pub use signing::*;
