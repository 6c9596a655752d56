//! Shared domain types for the Talon orchestration core.
//!
//! Everything the other crates agree on lives here: the error taxonomy, the
//! provider-agnostic message model, the chunk variants the agent loop emits,
//! lifecycle trace events, and the construction-time configuration surface.

pub mod chunk;
pub mod config;
pub mod error;
pub mod message;
pub mod trace;

pub use error::{Error, ProviderErrorKind, Result};
