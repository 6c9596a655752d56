use serde::Serialize;
use serde_json::Value;

/// Chunks emitted by the agent loop while a run is in flight.
///
/// The caller (gateway, CLI, tests) consumes these from an mpsc receiver;
/// suspension points in the loop are exactly the LLM and tool awaits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AgentChunk {
    /// Final (or partial, when the run was stopped) assistant text.
    #[serde(rename = "text")]
    Text { content: String },

    /// The model is invoking a tool.
    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// Tool execution result.
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        output: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A delegated sub-agent finished.
    #[serde(rename = "subagent_result")]
    SubagentResult {
        agent_type: String,
        summary: String,
        confidence: f32,
    },

    /// The run failed; `message` says which providers were attempted.
    #[serde(rename = "error")]
    Error { message: String },

    /// The run is over.
    #[serde(rename = "done")]
    Done {
        iterations: u32,
        total_tokens: u32,
        total_cost_usd: f64,
        /// True when the run stopped at the iteration cap rather than on a
        /// final answer: a deliberate safety stop, not an error.
        truncated: bool,
    },
}
