//! cardstream-core — wire format, payload classification, and configuration.
//! All other cardstream crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{classify, ClassifiedPayload, RequestItem, WireError};
