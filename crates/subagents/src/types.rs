//! Sub-agent task and result types.

use serde::{Deserialize, Serialize};

/// Built-in specialist types. They differ only in prompt template and
/// expected output shape, never in execution mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Research,
    Planner,
    Writer,
    Critic,
    Summarizer,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Planner => "planner",
            Self::Writer => "writer",
            Self::Critic => "critic",
            Self::Summarizer => "summarizer",
        }
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "planner" => Ok(Self::Planner),
            "writer" => Ok(Self::Writer),
            "critic" => Ok(Self::Critic),
            "summarizer" => Ok(Self::Summarizer),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delegated task. `isolated_context` is the only context the sub-agent
/// ever sees; the parent's message log never crosses this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentTask {
    pub agent_type: AgentType,
    pub description: String,
    #[serde(default)]
    pub isolated_context: Option<String>,
}

impl SubagentTask {
    pub fn new(agent_type: AgentType, description: impl Into<String>) -> Self {
        Self {
            agent_type,
            description: description.into(),
            isolated_context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.isolated_context = Some(context.into());
        self
    }
}

/// The outcome of one sub-agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    pub agent_type: AgentType,
    pub summary: String,
    /// Parsed JSON payload, when the model produced valid JSON.
    #[serde(default)]
    pub structured_data: Option<serde_json::Value>,
    /// 0.8 for parsed JSON output, 0.5 when the raw text was wrapped.
    pub confidence: f32,
    pub tokens_used: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
}
