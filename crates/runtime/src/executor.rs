//! The tool execution capability.
//!
//! Concrete tools (filesystem, shell, browser, ...) live outside the core;
//! the loop only forwards names and arguments and records the outcome. A
//! failed execution becomes a failed tool result the model sees on the next
//! iteration, never an error thrown through the loop.

use async_trait::async_trait;

use talon_domain::error::Result;
use talon_domain::message::ToolDefinition;
use talon_sessions::Session;

/// Outcome of one tool execution. The loop pairs it back to the requesting
/// call id when it builds the tool message.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            metadata: Default::default(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            metadata: Default::default(),
        }
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one tool call. Argument schemas are the executor's problem;
    /// the core forwards them opaquely.
    async fn execute(
        &self,
        name: &str,
        args: &serde_json::Value,
        session: &Session,
    ) -> Result<ToolOutcome>;

    /// Definitions for the tools available to a session, attached to every
    /// LLM request.
    fn definitions(&self) -> Vec<ToolDefinition>;
}
