//! Integration tests for sub-agent execution and context isolation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use talon_domain::config::{ContextConfig, FallbackConfig, LlmConfig, SubagentConfig, TierConfig};
use talon_domain::error::Result;
use talon_domain::trace::NoopSink;
use talon_providers::{
    ChatRequest, ChatResponse, FallbackOrchestrator, HealthRegistry, LlmClient, ModelRouter,
    ProviderRegistry, SystemClock, Usage,
};
use talon_subagents::{AgentType, DefaultPromptBuilder, SubagentManager, SubagentTask};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CapturingClient {
    reply: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl CapturingClient {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmClient for CapturingClient {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        Ok(ChatResponse {
            content: self.reply.clone(),
            tool_calls: vec![],
            usage: Some(Usage {
                input_tokens: 50,
                output_tokens: 20,
            }),
            model: req.model.unwrap_or_default(),
        })
    }

    fn provider_id(&self) -> &str {
        "stub"
    }
}

fn manager(client: Arc<CapturingClient>, config: SubagentConfig) -> SubagentManager {
    let llm = LlmConfig {
        tiers: TierConfig {
            cheap: vec!["stub/stub-mini".into()],
            premium: vec!["stub/stub-max".into()],
            ..Default::default()
        },
        ..Default::default()
    };
    let registry = Arc::new(ProviderRegistry::new(vec![client], &llm));
    let router = Arc::new(ModelRouter::new(
        llm,
        ContextConfig::default(),
        registry.usable_providers(),
        Arc::new(NoopSink),
    ));
    let orchestrator = Arc::new(FallbackOrchestrator::new(
        registry,
        Arc::new(HealthRegistry::new(
            &FallbackConfig::default(),
            Arc::new(SystemClock),
        )),
        &FallbackConfig::default(),
        Arc::new(NoopSink),
    ));
    SubagentManager::new(
        router,
        orchestrator,
        Arc::new(DefaultPromptBuilder),
        &config,
        Arc::new(NoopSink),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Isolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn spawn_sends_only_the_task_prompt() {
    let client = CapturingClient::new(r#"{"summary": "done", "data": null}"#);
    let mgr = manager(client.clone(), SubagentConfig::default());

    // The "parent history" that must never leak.
    let secret = "the user's bank account is 12345";

    let task = SubagentTask::new(AgentType::Research, "find http client crates")
        .with_context("prefer async");
    mgr.spawn(task, "parent-session-1").await.unwrap();

    let requests = client.requests.lock();
    assert_eq!(requests.len(), 1);
    // Exactly one message: the built prompt. No history, no system carryover.
    assert_eq!(requests[0].messages.len(), 1);
    let prompt = &requests[0].messages[0].content;
    assert!(prompt.contains("find http client crates"));
    assert!(prompt.contains("prefer async"));
    assert!(!prompt.contains(secret));
}

#[tokio::test]
async fn subagents_route_to_the_cheap_tier() {
    let client = CapturingClient::new(r#"{"summary": "done", "data": null}"#);
    let mgr = manager(client.clone(), SubagentConfig::default());

    mgr.spawn(SubagentTask::new(AgentType::Critic, "review"), "p")
        .await
        .unwrap();

    let requests = client.requests.lock();
    assert_eq!(requests[0].model.as_deref(), Some("stub-mini"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results and batches
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn non_json_reply_degrades_confidence() {
    let client = CapturingClient::new("plain prose, not json");
    let mgr = manager(client, SubagentConfig::default());

    let result = mgr
        .spawn(SubagentTask::new(AgentType::Writer, "write"), "p")
        .await
        .unwrap();
    assert_eq!(result.summary, "plain prose, not json");
    assert_eq!(result.confidence, 0.5);
    assert_eq!(result.tokens_used, 70);
}

#[tokio::test]
async fn parallel_batch_returns_per_task_results() {
    let client = CapturingClient::new(r#"{"summary": "done", "data": null}"#);
    let mgr = manager(client.clone(), SubagentConfig::default());

    let tasks = vec![
        SubagentTask::new(AgentType::Research, "a"),
        SubagentTask::new(AgentType::Planner, "b"),
        SubagentTask::new(AgentType::Critic, "c"),
    ];
    let results = mgr.spawn_parallel(tasks, "p").await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(client.requests.lock().len(), 3);

    let types: Vec<AgentType> = results
        .into_iter()
        .map(|r| r.unwrap().agent_type)
        .collect();
    assert_eq!(
        types,
        vec![AgentType::Research, AgentType::Planner, AgentType::Critic]
    );
}
