//! Context assembly and history compression.
//!
//! `build_context` produces the bounded message list for one loop iteration:
//! system prompt, rolling memory summary, recent messages, tool
//! descriptions. `compress` collapses history beyond the keep-recent
//! watermark into a new summary via a cheap-tier model; its failure is
//! always non-fatal to the caller's turn.

use std::sync::Arc;

use talon_domain::config::ContextConfig;
use talon_domain::error::Result;
use talon_domain::message::{Message, ToolDefinition};
use talon_domain::trace::{EventSink, TraceEvent};
use talon_providers::{
    ChatOptions, ChatRequest, Complexity, FallbackOrchestrator, ModelRouter, TaskType,
};
use talon_sessions::Session;

use crate::tokens::{estimate_history_tokens, estimate_message_tokens, estimate_tokens};
use crate::truncate::{pair_safe_split, truncate_to_fit};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transient result of context assembly for one iteration. Recomputed every
/// iteration, never persisted.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub system_prompt: String,
    pub memory_summary: Option<String>,
    pub recent_messages: Vec<Message>,
    pub tool_descriptions: Vec<ToolDefinition>,
    pub total_tokens_estimate: u32,
}

impl ContextWindow {
    /// Flatten into the message list sent to the provider. The summary rides
    /// as a second system message so it survives any later truncation.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.recent_messages.len() + 2);
        out.push(Message::system(&self.system_prompt));
        if let Some(summary) = &self.memory_summary {
            out.push(Message::system(format!(
                "Summary of the conversation so far:\n{summary}"
            )));
        }
        out.extend(self.recent_messages.iter().cloned());
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextManager {
    config: ContextConfig,
    sink: Arc<dyn EventSink>,
}

impl ContextManager {
    pub fn new(config: ContextConfig, sink: Arc<dyn EventSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assemble the context for one iteration. Recent messages start at a
    /// pair-safe boundary and are further truncated if they alone blow the
    /// budget.
    pub fn build_context(
        &self,
        session: &Session,
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> ContextWindow {
        let messages = &session.messages;
        let start = messages.len().saturating_sub(self.config.recent_messages);
        let start = pair_safe_split(messages, start);

        let fixed_tokens = estimate_tokens(system_prompt)
            + session
                .memory_summary
                .as_deref()
                .map(estimate_tokens)
                .unwrap_or(0)
            + tools
                .iter()
                .map(|t| estimate_tokens(&t.description) + estimate_tokens(&t.name))
                .sum::<u32>();

        let budget = self
            .config
            .context_window_tokens
            .saturating_sub(self.config.reserved_tokens)
            .saturating_sub(fixed_tokens);
        let recent = truncate_to_fit(&messages[start..], budget);

        let total = fixed_tokens + recent.iter().map(estimate_message_tokens).sum::<u32>();
        ContextWindow {
            system_prompt: system_prompt.to_owned(),
            memory_summary: session.memory_summary.clone(),
            recent_messages: recent,
            tool_descriptions: tools.to_vec(),
            total_tokens_estimate: total,
        }
    }

    /// True when estimated history tokens exceed
    /// `(window - reserved) * threshold`.
    pub fn should_compress(&self, session: &Session) -> bool {
        let history = estimate_history_tokens(&session.messages)
            + session
                .memory_summary
                .as_deref()
                .map(estimate_tokens)
                .unwrap_or(0);
        let usable = self
            .config
            .context_window_tokens
            .saturating_sub(self.config.reserved_tokens) as f32;
        history as f32 > usable * self.config.compress_threshold
    }

    /// Collapse history beyond the keep-recent watermark into a fresh
    /// summary. Callers treat failure as non-fatal: the turn proceeds on
    /// uncompressed history and a later iteration retries.
    pub async fn compress(
        &self,
        session: &mut Session,
        router: &ModelRouter,
        orchestrator: &FallbackOrchestrator,
    ) -> Result<()> {
        let keep_from = session
            .messages
            .len()
            .saturating_sub(self.config.keep_recent_messages);
        let keep_from = pair_safe_split(&session.messages, keep_from);
        if keep_from == 0 {
            return Ok(());
        }

        self.sink.emit(&TraceEvent::CompressionStart {
            session_id: session.id.clone(),
            messages_to_compress: keep_from,
        });

        match self
            .summarize(&session.messages[..keep_from], session.memory_summary.as_deref(), router, orchestrator)
            .await
        {
            Ok(summary) => {
                let summary = clamp_to_budget(summary, self.config.summary_budget_tokens);
                let summary_tokens = estimate_tokens(&summary);
                session.memory_summary = Some(summary);
                session.messages.drain(..keep_from);

                self.sink.emit(&TraceEvent::CompressionSuccess {
                    session_id: session.id.clone(),
                    messages_compressed: keep_from,
                    summary_tokens,
                });
                tracing::info!(
                    session_id = %session.id,
                    messages_compressed = keep_from,
                    summary_tokens,
                    "history compressed"
                );
                Ok(())
            }
            Err(err) => {
                self.sink.emit(&TraceEvent::CompressionFailed {
                    session_id: session.id.clone(),
                    reason: err.to_string(),
                });
                tracing::warn!(
                    session_id = %session.id,
                    error = %err,
                    "compression failed, turn proceeds uncompressed"
                );
                Err(err)
            }
        }
    }

    async fn summarize(
        &self,
        to_compress: &[Message],
        prior_summary: Option<&str>,
        router: &ModelRouter,
        orchestrator: &FallbackOrchestrator,
    ) -> Result<String> {
        let prompt = summary_prompt(to_compress, prior_summary);
        let candidates = router.select_candidates(
            TaskType::Summarization,
            Complexity::Low,
            estimate_tokens(&prompt),
        );

        let request = ChatRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            model: None,
            options: ChatOptions {
                temperature: Some(0.1),
                max_tokens: Some(self.config.summary_budget_tokens),
                json_mode: false,
            },
        };

        let response = orchestrator.execute(&candidates, request).await?;
        Ok(response.content)
    }
}

/// Keep the stored summary under its token budget; the model can overshoot
/// `max_tokens` slightly and older providers ignore it.
fn clamp_to_budget(summary: String, budget_tokens: u32) -> String {
    if estimate_tokens(&summary) <= budget_tokens {
        return summary;
    }
    // Exact inverse of the estimator: strip the 20% margin first, then the
    // 4-chars-per-token ratio, so the clamped text estimates at or under
    // the budget.
    let max_chars = (budget_tokens as usize * 5 / 6) * 4;
    summary.chars().take(max_chars).collect()
}

fn summary_prompt(messages: &[Message], prior_summary: Option<&str>) -> String {
    let mut conversation = String::new();
    if let Some(prior) = prior_summary {
        conversation.push_str("Existing summary: ");
        conversation.push_str(prior);
        conversation.push('\n');
    }
    for msg in messages {
        let label = match msg.role {
            talon_domain::message::Role::System => "System",
            talon_domain::message::Role::User => "User",
            talon_domain::message::Role::Assistant => "Assistant",
            talon_domain::message::Role::Tool => "Tool",
        };
        conversation.push_str(label);
        conversation.push_str(": ");
        push_clipped(&mut conversation, msg);
        conversation.push('\n');
    }

    format!(
        "You are a conversation summarizer. Summarize the following \
         conversation history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or context\n\n\
         Be concise but preserve all actionable context. Write in present \
         tense. Omit greetings and pleasantries.\n\n\
         CONVERSATION:\n{conversation}"
    )
}

/// Long tool outputs dominate the prompt; clip their middle.
fn push_clipped(buf: &mut String, msg: &Message) {
    let mut content = msg.content.clone();
    for result in &msg.tool_results {
        if !content.is_empty() {
            content.push(' ');
        }
        content.push_str(&result.output);
    }
    if content.chars().count() > 2_000 {
        let chars: Vec<char> = content.chars().collect();
        buf.extend(&chars[..1_000]);
        buf.push_str(" [...] ");
        buf.extend(&chars[chars.len() - 500..]);
    } else {
        buf.push_str(&content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_domain::trace::NoopSink;

    fn manager(config: ContextConfig) -> ContextManager {
        ContextManager::new(config, Arc::new(NoopSink))
    }

    fn session_with(n: usize, filler: usize) -> Session {
        let mut session = Session::new("k");
        for i in 0..n {
            session
                .messages
                .push(Message::user(format!("msg {i} {}", "x".repeat(filler))));
        }
        session
    }

    #[test]
    fn should_compress_at_watermark() {
        let config = ContextConfig {
            context_window_tokens: 1_000,
            reserved_tokens: 100,
            compress_threshold: 0.8,
            ..Default::default()
        };
        let mgr = manager(config);

        // Usable = 900, watermark = 720 tokens.
        assert!(!mgr.should_compress(&session_with(2, 10)));
        assert!(mgr.should_compress(&session_with(10, 400)));
    }

    #[test]
    fn build_context_keeps_recent_window() {
        let config = ContextConfig {
            recent_messages: 3,
            ..Default::default()
        };
        let mgr = manager(config);
        let session = session_with(10, 10);

        let window = mgr.build_context(&session, "you are talon", &[]);
        assert_eq!(window.recent_messages.len(), 3);
        assert!(window.recent_messages[0].content.starts_with("msg 7"));

        let messages = window.to_messages();
        assert_eq!(messages[0].content, "you are talon");
    }

    #[test]
    fn summary_rides_as_system_message() {
        let mgr = manager(ContextConfig::default());
        let mut session = session_with(2, 10);
        session.memory_summary = Some("user wants files listed".into());

        let messages = mgr.build_context(&session, "sys", &[]).to_messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[1].content.contains("user wants files listed"));
    }

    #[test]
    fn clamp_respects_budget() {
        let long = "word ".repeat(2_000);
        let clamped = clamp_to_budget(long, 100);
        assert!(estimate_tokens(&clamped) <= 100);
        assert_eq!(clamp_to_budget("short".into(), 100), "short");
    }

    #[test]
    fn clamped_estimate_never_exceeds_the_cap_at_boundaries() {
        // The double-ceil in the estimator must not push the clamped text
        // one token over the cap.
        for budget in [1, 10, 99, 100, 101, 800] {
            let clamped = clamp_to_budget("x".repeat(10_000), budget);
            assert!(
                estimate_tokens(&clamped) <= budget,
                "budget {budget}: clamped text estimates at {}",
                estimate_tokens(&clamped)
            );
        }
    }

    #[test]
    fn oversized_reservation_never_panics() {
        let config = ContextConfig {
            context_window_tokens: 100,
            reserved_tokens: 200,
            ..Default::default()
        };
        let mgr = manager(config);
        let session = session_with(4, 10);

        assert!(mgr.should_compress(&session));
        let window = mgr.build_context(&session, "sys", &[]);
        assert!(window.recent_messages.is_empty());
    }
}
