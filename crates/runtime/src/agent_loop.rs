//! The agent loop, the per-turn state machine.
//!
//! One [`AgentLoop::run`] call consumes one user message against one
//! session: it assembles context, calls the fallback orchestrator,
//! dispatches tool calls (delegation included), and loops until the model
//! answers in plain text or the iteration cap stops it. The loop is the
//! only component that mutates a session's message log, and it holds the
//! per-session lock for the whole run.

use std::sync::Arc;

use tokio::sync::mpsc;

use talon_context::ContextManager;
use talon_domain::chunk::AgentChunk;
use talon_domain::config::LoopConfig;
use talon_domain::error::Result;
use talon_domain::message::{Message, ToolCall, ToolResult};
use talon_domain::trace::{EventSink, TraceEvent};
use talon_providers::router::resolve_model;
use talon_providers::{
    ChatOptions, ChatRequest, ChatResponse, Complexity, FallbackOrchestrator, ModelRouter,
    ProviderCandidate, TaskType, Tier,
};
use talon_sessions::{Session, SessionLockMap, SessionManager, ThinkingLevel};
use talon_subagents::SubagentManager;
use tokio_util::sync::CancellationToken;

use crate::cancel::RunCancelMap;
use crate::delegate;
use crate::executor::ToolExecutor;
use crate::phase::{LoopPhase, PhaseTracker};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run input / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RunInput {
    pub session_key: String,
    pub user_message: String,
}

/// How one run ended. `phase` is `Done` for a completed answer (truncated
/// or not) and `Error` when the turn failed or was cancelled.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub phase: LoopPhase,
    pub final_text: Option<String>,
    pub iterations: u32,
    pub total_tokens: u32,
    pub total_cost_usd: f64,
    pub truncated: bool,
}

/// Running totals for one in-flight run.
#[derive(Default)]
struct RunTotals {
    input_tokens: u32,
    output_tokens: u32,
    cost_usd: f64,
}

impl RunTotals {
    fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentLoop {
    config: LoopConfig,
    system_prompt: String,
    router: Arc<ModelRouter>,
    orchestrator: Arc<FallbackOrchestrator>,
    context: Arc<ContextManager>,
    subagents: Arc<SubagentManager>,
    sessions: Arc<SessionManager>,
    tools: Arc<dyn ToolExecutor>,
    locks: Arc<SessionLockMap>,
    cancel_map: Arc<RunCancelMap>,
    sink: Arc<dyn EventSink>,
}

#[allow(clippy::too_many_arguments)]
impl AgentLoop {
    pub fn new(
        config: LoopConfig,
        system_prompt: impl Into<String>,
        router: Arc<ModelRouter>,
        orchestrator: Arc<FallbackOrchestrator>,
        context: Arc<ContextManager>,
        subagents: Arc<SubagentManager>,
        sessions: Arc<SessionManager>,
        tools: Arc<dyn ToolExecutor>,
        locks: Arc<SessionLockMap>,
        cancel_map: Arc<RunCancelMap>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            system_prompt: system_prompt.into(),
            router,
            orchestrator,
            context,
            subagents,
            sessions,
            tools,
            locks,
            cancel_map,
            sink,
        }
    }

    /// Spawn a run and return the chunk stream. Callers that want the
    /// [`RunOutcome`] directly use [`run`](Self::run).
    pub fn start(self: Arc<Self>, input: RunInput) -> mpsc::Receiver<AgentChunk> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let outcome = self.run(input, tx).await;
            tracing::debug!(
                phase = %outcome.phase,
                iterations = outcome.iterations,
                "run finished"
            );
        });
        rx
    }

    /// Run one turn to completion, emitting chunks along the way. Always
    /// resolves to an outcome: errors surface as an `Error` chunk and an
    /// `Error`-phase outcome, never a bare failure.
    pub async fn run(&self, input: RunInput, tx: mpsc::Sender<AgentChunk>) -> RunOutcome {
        // Serialization boundary: one run per session id at a time.
        let permit = match self.locks.acquire(&input.session_key).await {
            Ok(p) => p,
            Err(err) => return self.fail_early(&tx, err.to_string()).await,
        };
        let cancel = self.cancel_map.register(&input.session_key);

        let outcome = self.run_inner(&input, &tx, &cancel).await;

        self.cancel_map.remove(&input.session_key);
        drop(permit);
        outcome
    }

    async fn run_inner(
        &self,
        input: &RunInput,
        tx: &mpsc::Sender<AgentChunk>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let (mut session, _is_new) = match self.sessions.resolve_or_create(&input.session_key) {
            Ok(v) => v,
            Err(err) => return self.fail_early(tx, err.to_string()).await,
        };

        let mut phase = PhaseTracker::new(session.id.clone(), Arc::clone(&self.sink));
        let mut totals = RunTotals::default();
        let mut iterations = 0u32;

        // The user turn is committed before anything can fail.
        session.append_messages([Message::user(&input.user_message)]);
        if let Err(err) = self.sessions.commit(session.clone()) {
            return self.fail(tx, &mut phase, iterations, &totals, err.to_string()).await;
        }

        let mut tool_defs = self.tools.definitions();
        tool_defs.extend(delegate::definitions());

        let max_iterations = self.config.max_iterations;
        while iterations < max_iterations {
            iterations += 1;

            // Compression check precedes every LLM call; a failed compress
            // is logged by the manager and retried on a later iteration.
            if self.context.should_compress(&session) {
                phase.transition(LoopPhase::Compressing);
                if self
                    .context
                    .compress(&mut session, &self.router, &self.orchestrator)
                    .await
                    .is_ok()
                {
                    if let Err(err) = self.sessions.commit(session.clone()) {
                        return self.fail(tx, &mut phase, iterations, &totals, err.to_string()).await;
                    }
                }
            }
            phase.transition(LoopPhase::Executing);
            self.sink.emit(&TraceEvent::LoopIteration {
                session_id: session.id.clone(),
                iteration: iterations,
                phase: phase.phase().to_string(),
            });

            let window = self.context.build_context(&session, &self.system_prompt, &tool_defs);
            let candidates = self.candidates_for(&session, window.total_tokens_estimate);
            let request = ChatRequest {
                messages: window.to_messages(),
                tools: tool_defs.clone(),
                model: None,
                options: ChatOptions {
                    temperature: Some(0.2),
                    max_tokens: None,
                    json_mode: false,
                },
            };

            let response: ChatResponse = tokio::select! {
                _ = cancel.cancelled() => {
                    return self.cancelled(tx, &mut phase, iterations, &totals, &mut session).await;
                }
                result = self.orchestrator.execute(&candidates, request) => match result {
                    Ok(response) => response,
                    // A failed primary call ends the turn; the loop never
                    // retries the whole turn on its own.
                    Err(err) => {
                        return self.fail(tx, &mut phase, iterations, &totals, err.to_string()).await;
                    }
                },
            };

            if let Some(usage) = response.usage {
                totals.input_tokens += usage.input_tokens;
                totals.output_tokens += usage.output_tokens;
                if let Some(pricing) = self.router.pricing(&response.model) {
                    totals.cost_usd += pricing.estimate_cost(usage.input_tokens, usage.output_tokens);
                }
            }
            session.current_model = Some(response.model.clone());

            phase.transition(LoopPhase::Evaluating);

            if response.tool_calls.is_empty() {
                // Plain text, no calls: the final answer.
                return self
                    .respond(tx, &mut phase, iterations, &totals, &mut session, response.content, false)
                    .await;
            }

            for call in &response.tool_calls {
                self.sink.emit(&TraceEvent::LoopToolCall {
                    session_id: session.id.clone(),
                    tool_name: call.tool_name.clone(),
                    call_id: call.call_id.clone(),
                });
                let _ = tx
                    .send(AgentChunk::ToolCall {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
            }

            // Dispatch the batch concurrently; results come back in call
            // order. Cancellation drops the batch whole; a partial append
            // would strand tool calls without results.
            let futures: Vec<_> = response
                .tool_calls
                .iter()
                .map(|call| self.dispatch_call(call, &session, tx))
                .collect();
            let batch: Option<Vec<ToolResult>> = tokio::select! {
                _ = cancel.cancelled() => None,
                results = futures_util::future::join_all(futures) => Some(results),
            };
            let results = match batch {
                Some(results) => results,
                None => {
                    return self.cancelled(tx, &mut phase, iterations, &totals, &mut session).await;
                }
            };

            for result in &results {
                let tool_name = response
                    .tool_calls
                    .iter()
                    .find(|c| c.call_id == result.call_id)
                    .map(|c| c.tool_name.clone())
                    .unwrap_or_default();
                let _ = tx
                    .send(AgentChunk::ToolResult {
                        call_id: result.call_id.clone(),
                        tool_name,
                        output: result.output.clone(),
                        is_error: !result.success,
                    })
                    .await;
            }

            // The assistant message and its results are one atomic append,
            // saved immediately so a crash loses at most this iteration.
            session.append_messages([
                Message::assistant_with_calls(&response.content, response.tool_calls.clone()),
                Message::tool_results(results),
            ]);
            if let Err(err) = self.sessions.commit(session.clone()) {
                return self.fail(tx, &mut phase, iterations, &totals, err.to_string()).await;
            }
        }

        // Iteration cap: a deliberate safety stop, not an error.
        let warning =
            format!("Stopped after {max_iterations} iterations without a final answer.");
        tracing::warn!(
            session_id = %session.id,
            max_iterations,
            "iteration cap reached, truncating run"
        );
        self.respond(tx, &mut phase, iterations, &totals, &mut session, warning, true)
            .await
    }

    /// Candidate list for the main loop call: a forced per-session model
    /// wins outright, otherwise the router's tier table decides.
    fn candidates_for(&self, session: &Session, input_tokens: u32) -> Vec<ProviderCandidate> {
        if let Some(spec) = session.overrides.model.as_deref() {
            let (provider_id, model) = resolve_model(spec);
            return vec![ProviderCandidate {
                provider_id: provider_id.to_string(),
                model: model.to_string(),
                tier: Tier::Mid,
            }];
        }

        let (task, complexity) = match session.overrides.thinking_level {
            Some(ThinkingLevel::High) => (TaskType::Reasoning, Complexity::High),
            _ => (TaskType::Orchestration, Complexity::Medium),
        };
        self.router.select_candidates(task, complexity, input_tokens)
    }

    /// Execute one tool call: delegation tools run in-process through the
    /// sub-agent manager, everything else goes to the external executor.
    /// Failures of either kind become failed tool results; the model reacts
    /// on the next iteration.
    async fn dispatch_call(
        &self,
        call: &ToolCall,
        session: &Session,
        tx: &mpsc::Sender<AgentChunk>,
    ) -> ToolResult {
        if call.tool_name == delegate::DELEGATE_TOOL {
            return match self.run_delegate(call, session, tx).await {
                Ok(output) => ToolResult::ok(&call.call_id, output),
                Err(err) => ToolResult::failed(&call.call_id, err.to_string()),
            };
        }
        if call.tool_name == delegate::DELEGATE_PARALLEL_TOOL {
            return match self.run_delegate_parallel(call, session, tx).await {
                Ok(output) => ToolResult::ok(&call.call_id, output),
                Err(err) => ToolResult::failed(&call.call_id, err.to_string()),
            };
        }

        match self
            .tools
            .execute(&call.tool_name, &call.arguments, session)
            .await
        {
            Ok(outcome) => ToolResult {
                call_id: call.call_id.clone(),
                success: outcome.success,
                output: outcome.output,
                metadata: outcome.metadata,
            },
            Err(err) => {
                tracing::warn!(
                    tool_name = %call.tool_name,
                    call_id = %call.call_id,
                    error = %err,
                    "tool execution failed"
                );
                ToolResult::failed(&call.call_id, format!("tool error: {err}"))
            }
        }
    }

    async fn run_delegate(
        &self,
        call: &ToolCall,
        session: &Session,
        tx: &mpsc::Sender<AgentChunk>,
    ) -> Result<String> {
        let task = delegate::parse_delegate_args(&call.arguments)?;
        let result = self.subagents.spawn(task, &session.id).await?;
        let _ = tx
            .send(AgentChunk::SubagentResult {
                agent_type: result.agent_type.to_string(),
                summary: result.summary.clone(),
                confidence: result.confidence,
            })
            .await;
        Ok(delegate::render_result(&result))
    }

    async fn run_delegate_parallel(
        &self,
        call: &ToolCall,
        session: &Session,
        tx: &mpsc::Sender<AgentChunk>,
    ) -> Result<String> {
        let tasks = delegate::parse_delegate_parallel_args(&call.arguments)?;
        let results = self.subagents.spawn_parallel(tasks, &session.id).await;

        // Per-task outcomes; one failure never poisons the batch.
        let mut rendered = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(result) => {
                    let _ = tx
                        .send(AgentChunk::SubagentResult {
                            agent_type: result.agent_type.to_string(),
                            summary: result.summary.clone(),
                            confidence: result.confidence,
                        })
                        .await;
                    rendered.push(serde_json::json!({
                        "ok": serde_json::from_str::<serde_json::Value>(
                            &delegate::render_result(&result)
                        )?,
                    }));
                }
                Err(err) => rendered.push(serde_json::json!({ "error": err.to_string() })),
            }
        }
        Ok(serde_json::Value::Array(rendered).to_string())
    }

    // ── run endings ────────────────────────────────────────────────

    /// Final answer (or truncation notice): append, commit, emit, close.
    async fn respond(
        &self,
        tx: &mpsc::Sender<AgentChunk>,
        phase: &mut PhaseTracker,
        iterations: u32,
        totals: &RunTotals,
        session: &mut Session,
        text: String,
        truncated: bool,
    ) -> RunOutcome {
        phase.transition(LoopPhase::Responding);

        session.append_messages([Message::assistant(&text)]);
        session.record_usage(
            totals.input_tokens as u64,
            totals.output_tokens as u64,
            totals.cost_usd,
        );
        if let Err(err) = self.sessions.commit(session.clone()) {
            return self.fail(tx, phase, iterations, totals, err.to_string()).await;
        }

        let _ = tx.send(AgentChunk::Text { content: text.clone() }).await;
        phase.transition(LoopPhase::Done);
        let _ = tx
            .send(AgentChunk::Done {
                iterations,
                total_tokens: totals.total_tokens(),
                total_cost_usd: totals.cost_usd,
                truncated,
            })
            .await;

        RunOutcome {
            phase: LoopPhase::Done,
            final_text: Some(text),
            iterations,
            total_tokens: totals.total_tokens(),
            total_cost_usd: totals.cost_usd,
            truncated,
        }
    }

    /// Failure before a session was even resolved.
    async fn fail_early(&self, tx: &mpsc::Sender<AgentChunk>, message: String) -> RunOutcome {
        let _ = tx.send(AgentChunk::Error { message }).await;
        let _ = tx
            .send(AgentChunk::Done {
                iterations: 0,
                total_tokens: 0,
                total_cost_usd: 0.0,
                truncated: false,
            })
            .await;
        RunOutcome {
            phase: LoopPhase::Error,
            final_text: None,
            iterations: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            truncated: false,
        }
    }

    /// Turn-ending failure: structured error chunk, then `Error → Done`.
    async fn fail(
        &self,
        tx: &mpsc::Sender<AgentChunk>,
        phase: &mut PhaseTracker,
        iterations: u32,
        totals: &RunTotals,
        message: String,
    ) -> RunOutcome {
        tracing::error!(error = %message, iterations, "run failed");
        phase.transition(LoopPhase::Error);
        let _ = tx.send(AgentChunk::Error { message }).await;
        phase.transition(LoopPhase::Done);
        let _ = tx
            .send(AgentChunk::Done {
                iterations,
                total_tokens: totals.total_tokens(),
                total_cost_usd: totals.cost_usd,
                truncated: false,
            })
            .await;
        RunOutcome {
            phase: LoopPhase::Error,
            final_text: None,
            iterations,
            total_tokens: totals.total_tokens(),
            total_cost_usd: totals.cost_usd,
            truncated: false,
        }
    }

    /// Cancellation: everything already committed stays; the in-flight
    /// call's output is discarded.
    async fn cancelled(
        &self,
        tx: &mpsc::Sender<AgentChunk>,
        phase: &mut PhaseTracker,
        iterations: u32,
        totals: &RunTotals,
        session: &mut Session,
    ) -> RunOutcome {
        tracing::info!(session_id = %session.id, iterations, "run cancelled");
        session.record_usage(
            totals.input_tokens as u64,
            totals.output_tokens as u64,
            totals.cost_usd,
        );
        if let Err(err) = self.sessions.commit(session.clone()) {
            tracing::warn!(error = %err, "failed to commit session after cancellation");
        }
        self.fail(tx, phase, iterations, totals, "run cancelled".into())
            .await
    }
}
