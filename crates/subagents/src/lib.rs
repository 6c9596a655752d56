//! Isolated-context task delegation for the Talon core.
//!
//! Sub-agents are narrowly-scoped specialist runs: minimal prompt, cheap
//! tier, short timeout, structured JSON result. They never see the parent
//! session's message log.

pub mod manager;
pub mod prompt;
pub mod types;

pub use manager::SubagentManager;
pub use prompt::{DefaultPromptBuilder, SubagentPromptBuilder};
pub use types::{AgentType, SubagentResult, SubagentTask};
