//! Sub-agent prompt construction.
//!
//! New agent types plug in through [`SubagentPromptBuilder`] without
//! touching the manager's execution mechanics.

use crate::types::{AgentType, SubagentTask};

/// Builds the full prompt for one sub-agent task.
pub trait SubagentPromptBuilder: Send + Sync {
    fn build(&self, task: &SubagentTask) -> String;
}

/// Prompt templates for the built-in agent types. Each asks for a JSON
/// object so the manager can parse a structured result.
pub struct DefaultPromptBuilder;

impl DefaultPromptBuilder {
    fn role_instructions(agent_type: AgentType) -> &'static str {
        match agent_type {
            AgentType::Research => {
                "You are a research specialist. Investigate the task and report \
                 findings with sources where you can name them."
            }
            AgentType::Planner => {
                "You are a planning specialist. Break the task into a short \
                 ordered list of concrete steps."
            }
            AgentType::Writer => {
                "You are a writing specialist. Produce the requested text, \
                 polished and ready to use."
            }
            AgentType::Critic => {
                "You are a critical reviewer. Identify flaws, risks, and \
                 concrete improvements for the given work."
            }
            AgentType::Summarizer => {
                "You are a summarization specialist. Condense the given \
                 material, preserving every actionable fact."
            }
        }
    }
}

impl SubagentPromptBuilder for DefaultPromptBuilder {
    fn build(&self, task: &SubagentTask) -> String {
        let mut prompt = String::from(Self::role_instructions(task.agent_type));
        prompt.push_str("\n\nTASK:\n");
        prompt.push_str(&task.description);

        if let Some(context) = &task.isolated_context {
            prompt.push_str("\n\nCONTEXT:\n");
            prompt.push_str(context);
        }

        prompt.push_str(
            "\n\nRespond with a single JSON object:\n\
             {\"summary\": \"<one-paragraph result>\", \
             \"data\": <structured details or null>, \
             \"confidence\": <0.0-1.0>}",
        );
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_task_and_context_only() {
        let task = SubagentTask::new(AgentType::Research, "compare tokio and smol")
            .with_context("audience: backend team");
        let prompt = DefaultPromptBuilder.build(&task);

        assert!(prompt.contains("research specialist"));
        assert!(prompt.contains("compare tokio and smol"));
        assert!(prompt.contains("audience: backend team"));
        assert!(prompt.contains("\"summary\""));
    }

    #[test]
    fn templates_differ_per_type() {
        let research = DefaultPromptBuilder.build(&SubagentTask::new(AgentType::Research, "t"));
        let critic = DefaultPromptBuilder.build(&SubagentTask::new(AgentType::Critic, "t"));
        assert_ne!(research, critic);
    }
}
