//! Built-in delegation tools.
//!
//! The model delegates to specialists through two internal tool names,
//! intercepted by the loop before external dispatch: `agent.delegate` for
//! one task, `agent.delegate_parallel` for a bounded batch. They look like
//! ordinary tools to the model; the executor never sees them.

use serde::Deserialize;
use serde_json::json;

use talon_domain::error::{Error, Result};
use talon_domain::message::ToolDefinition;
use talon_subagents::{AgentType, SubagentResult, SubagentTask};

pub const DELEGATE_TOOL: &str = "agent.delegate";
pub const DELEGATE_PARALLEL_TOOL: &str = "agent.delegate_parallel";

pub fn is_delegate_tool(name: &str) -> bool {
    name == DELEGATE_TOOL || name == DELEGATE_PARALLEL_TOOL
}

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    agent_type: String,
    description: String,
    #[serde(default)]
    context: Option<String>,
}

/// Parse `agent.delegate` arguments into a task.
pub fn parse_delegate_args(args: &serde_json::Value) -> Result<SubagentTask> {
    let args: DelegateArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::Other(format!("bad {DELEGATE_TOOL} arguments: {e}")))?;
    let agent_type: AgentType = args
        .agent_type
        .parse()
        .map_err(Error::Other)?;

    let mut task = SubagentTask::new(agent_type, args.description);
    if let Some(context) = args.context {
        task = task.with_context(context);
    }
    Ok(task)
}

/// Parse `agent.delegate_parallel` arguments into a batch of tasks.
pub fn parse_delegate_parallel_args(args: &serde_json::Value) -> Result<Vec<SubagentTask>> {
    #[derive(Debug, Deserialize)]
    struct BatchArgs {
        tasks: Vec<DelegateArgs>,
    }

    let batch: BatchArgs = serde_json::from_value(args.clone())
        .map_err(|e| Error::Other(format!("bad {DELEGATE_PARALLEL_TOOL} arguments: {e}")))?;

    batch
        .tasks
        .into_iter()
        .map(|a| {
            let agent_type: AgentType = a.agent_type.parse().map_err(Error::Other)?;
            let mut task = SubagentTask::new(agent_type, a.description);
            if let Some(context) = a.context {
                task = task.with_context(context);
            }
            Ok(task)
        })
        .collect()
}

/// Serialize one sub-agent outcome for the tool result the model reads.
pub fn render_result(result: &SubagentResult) -> String {
    json!({
        "agent_type": result.agent_type.as_str(),
        "summary": result.summary,
        "data": result.structured_data,
        "confidence": result.confidence,
    })
    .to_string()
}

/// Tool definitions advertised alongside the external executor's tools.
pub fn definitions() -> Vec<ToolDefinition> {
    let task_properties = json!({
        "agent_type": {
            "type": "string",
            "enum": ["research", "planner", "writer", "critic", "summarizer"],
            "description": "Specialist to delegate to"
        },
        "description": {
            "type": "string",
            "description": "What the specialist should do"
        },
        "context": {
            "type": "string",
            "description": "Only the facts the specialist needs; it cannot see this conversation"
        }
    });

    vec![
        ToolDefinition {
            name: DELEGATE_TOOL.into(),
            description: "Delegate a narrow task to a specialist sub-agent and get \
                          a structured result back."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": task_properties.clone(),
                "required": ["agent_type", "description"]
            }),
        },
        ToolDefinition {
            name: DELEGATE_PARALLEL_TOOL.into(),
            description: "Delegate several independent tasks to specialist \
                          sub-agents concurrently."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": task_properties,
                            "required": ["agent_type", "description"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegate_args_parse() {
        let task = parse_delegate_args(&json!({
            "agent_type": "research",
            "description": "compare crates",
            "context": "async only"
        }))
        .unwrap();
        assert_eq!(task.agent_type, AgentType::Research);
        assert_eq!(task.isolated_context.as_deref(), Some("async only"));
    }

    #[test]
    fn unknown_agent_type_is_an_error() {
        let err = parse_delegate_args(&json!({
            "agent_type": "juggler",
            "description": "x"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("juggler"));
    }

    #[test]
    fn parallel_args_parse() {
        let tasks = parse_delegate_parallel_args(&json!({
            "tasks": [
                {"agent_type": "planner", "description": "plan"},
                {"agent_type": "critic", "description": "review"}
            ]
        }))
        .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].agent_type, AgentType::Critic);
    }

    #[test]
    fn definitions_cover_both_tools() {
        let defs = definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![DELEGATE_TOOL, DELEGATE_PARALLEL_TOOL]);
        assert!(is_delegate_tool(DELEGATE_TOOL));
        assert!(!is_delegate_tool("file_list"));
    }
}
