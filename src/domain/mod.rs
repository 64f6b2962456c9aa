//! Core domain types for the VIN node
//!
//! Wire-facing structs keep the canonical protocol attribute names, since
//! they cross the wire and feed the canonicalization layer.

mod llm;
mod receipt;
mod x402;

pub use llm::*;
pub use receipt::*;
pub use x402::*;
