//! Token-budgeted context assembly, truncation, and history compression
//! for the Talon core.

pub mod manager;
pub mod tokens;
pub mod truncate;

pub use manager::{ContextManager, ContextWindow};
pub use tokens::{estimate_history_tokens, estimate_message_tokens, estimate_tokens};
pub use truncate::{pair_safe_split, truncate_to_fit};
