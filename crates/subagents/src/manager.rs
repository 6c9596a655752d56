//! Sub-agent execution.
//!
//! Each spawn builds a minimal prompt from the task alone, selects a
//! cheap-tier candidate list, and runs through the fallback orchestrator
//! under the sub-agent timeout. Parallel batches are bounded by a semaphore
//! and return per-task results; one task's failure never poisons the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use talon_domain::config::SubagentConfig;
use talon_domain::error::{Error, ProviderErrorKind, Result};
use talon_domain::message::Message;
use talon_domain::trace::{EventSink, TraceEvent};
use talon_providers::{
    ChatOptions, ChatRequest, Complexity, FallbackOrchestrator, ModelRouter, TaskType,
};

use crate::prompt::SubagentPromptBuilder;
use crate::types::{SubagentResult, SubagentTask};

const PARSED_CONFIDENCE: f32 = 0.8;
const RAW_TEXT_CONFIDENCE: f32 = 0.5;

pub struct SubagentManager {
    router: Arc<ModelRouter>,
    orchestrator: Arc<FallbackOrchestrator>,
    prompts: Arc<dyn SubagentPromptBuilder>,
    timeout: Duration,
    concurrency: Arc<Semaphore>,
    sink: Arc<dyn EventSink>,
}

impl SubagentManager {
    pub fn new(
        router: Arc<ModelRouter>,
        orchestrator: Arc<FallbackOrchestrator>,
        prompts: Arc<dyn SubagentPromptBuilder>,
        config: &SubagentConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            router,
            orchestrator,
            prompts,
            timeout: Duration::from_millis(config.timeout_ms),
            concurrency: Arc::new(Semaphore::new(config.max_concurrent)),
            sink,
        }
    }

    /// Run one sub-agent task to completion.
    pub async fn spawn(
        &self,
        task: SubagentTask,
        parent_session_id: &str,
    ) -> Result<SubagentResult> {
        self.sink.emit(&TraceEvent::SubagentSpawned {
            agent_type: task.agent_type.to_string(),
            parent_session_id: parent_session_id.to_owned(),
        });
        tracing::info!(
            agent_type = %task.agent_type,
            parent_session_id,
            "sub-agent spawned"
        );

        let started = Instant::now();
        let prompt = self.prompts.build(&task);

        // Sub-agents never get premium models; the tier table pins them to
        // cheap regardless of complexity.
        let candidates = self.router.select_candidates(
            TaskType::Subagent,
            Complexity::Low,
            talon_context::estimate_tokens(&prompt),
        );

        let request = ChatRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            model: None,
            options: ChatOptions {
                temperature: Some(0.3),
                max_tokens: None,
                json_mode: true,
            },
        };

        let response = tokio::time::timeout(self.timeout, self.orchestrator.execute(&candidates, request))
            .await
            .map_err(|_| {
                Error::provider(
                    "subagent",
                    ProviderErrorKind::Timeout,
                    format!(
                        "{} sub-agent exceeded {}ms",
                        task.agent_type,
                        self.timeout.as_millis()
                    ),
                )
            })??;

        let tokens_used = response.usage.map(|u| u.total()).unwrap_or(0);
        let cost_usd = response
            .usage
            .and_then(|u| {
                self.router
                    .pricing(&response.model)
                    .map(|p| p.estimate_cost(u.input_tokens, u.output_tokens))
            })
            .unwrap_or(0.0);

        let mut result = interpret_response(&task, &response.content);
        result.tokens_used = tokens_used;
        result.cost_usd = cost_usd;
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Fan out a batch of tasks with bounded concurrency and join. Each
    /// task's outcome is reported individually.
    pub async fn spawn_parallel(
        &self,
        tasks: Vec<SubagentTask>,
        parent_session_id: &str,
    ) -> Vec<Result<SubagentResult>> {
        let futures = tasks.into_iter().map(|task| {
            let concurrency = Arc::clone(&self.concurrency);
            async move {
                let _permit = concurrency
                    .acquire()
                    .await
                    .map_err(|_| Error::Other("sub-agent semaphore closed".into()))?;
                self.spawn(task, parent_session_id).await
            }
        });
        futures_util::future::join_all(futures).await
    }
}

/// Interpret the model's reply. Valid JSON becomes a structured result;
/// anything else is wrapped as raw text at reduced confidence rather than
/// failing the spawn.
fn interpret_response(task: &SubagentTask, content: &str) -> SubagentResult {
    match serde_json::from_str::<serde_json::Value>(content.trim()) {
        Ok(value) if value.is_object() => {
            let summary = value
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or(content)
                .to_owned();
            let confidence = value
                .get("confidence")
                .and_then(|v| v.as_f64())
                .map(|c| c as f32)
                .unwrap_or(PARSED_CONFIDENCE);
            SubagentResult {
                agent_type: task.agent_type,
                summary,
                structured_data: value.get("data").filter(|v| !v.is_null()).cloned(),
                confidence,
                tokens_used: 0,
                cost_usd: 0.0,
                duration_ms: 0,
            }
        }
        _ => {
            tracing::debug!(
                agent_type = %task.agent_type,
                "sub-agent reply was not JSON, wrapping raw text"
            );
            SubagentResult {
                agent_type: task.agent_type,
                summary: content.to_owned(),
                structured_data: None,
                confidence: RAW_TEXT_CONFIDENCE,
                tokens_used: 0,
                cost_usd: 0.0,
                duration_ms: 0,
            }
        }
    }
}
