//! Talon runtime: wires the routing, fallback, context, session and
//! sub-agent subsystems into a ready-to-run [`AgentLoop`].
//!
//! Embedders supply the four external seams (LLM clients, a tool
//! executor, a session store, an event sink) and get back a [`Runtime`]
//! whose loop handles one inbound message per call.

pub mod agent_loop;
pub mod cancel;
pub mod delegate;
pub mod executor;
pub mod phase;
pub mod telemetry;

use std::sync::Arc;

use tokio::sync::mpsc;

use talon_context::ContextManager;
use talon_domain::chunk::AgentChunk;
use talon_domain::config::Config;
use talon_domain::error::Result;
use talon_domain::trace::EventSink;
use talon_providers::{
    FallbackOrchestrator, HealthRegistry, LlmClient, ModelRouter, ProviderRegistry, SystemClock,
};
use talon_sessions::{SessionLockMap, SessionManager, SessionStore};
use talon_subagents::{DefaultPromptBuilder, SubagentManager};

pub use agent_loop::{AgentLoop, RunInput, RunOutcome};
pub use cancel::RunCancelMap;
pub use executor::{ToolExecutor, ToolOutcome};
pub use phase::{LoopPhase, PhaseTracker};
pub use telemetry::init_tracing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully wired agent core. All handles are cheap clones.
pub struct Runtime {
    pub agent_loop: Arc<AgentLoop>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<ModelRouter>,
    pub cancel: Arc<RunCancelMap>,
}

impl Runtime {
    /// Initialize every subsystem from config and the injected seams.
    pub fn build(
        config: Config,
        clients: Vec<Arc<dyn LlmClient>>,
        tools: Arc<dyn ToolExecutor>,
        store: Arc<dyn SessionStore>,
        system_prompt: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::new(clients, &config.llm));
        if registry.is_empty() {
            tracing::warn!("no LLM providers registered, every run will fail over to nothing");
        }

        let router = Arc::new(ModelRouter::new(
            config.llm.clone(),
            config.context.clone(),
            registry.usable_providers(),
            Arc::clone(&sink),
        ));
        let health = Arc::new(HealthRegistry::new(&config.fallback, Arc::new(SystemClock)));
        let orchestrator = Arc::new(FallbackOrchestrator::new(
            Arc::clone(&registry),
            health,
            &config.fallback,
            Arc::clone(&sink),
        ));
        let context = Arc::new(ContextManager::new(config.context.clone(), Arc::clone(&sink)));
        let subagents = Arc::new(SubagentManager::new(
            Arc::clone(&router),
            Arc::clone(&orchestrator),
            Arc::new(DefaultPromptBuilder),
            &config.subagents,
            Arc::clone(&sink),
        ));
        let sessions = Arc::new(SessionManager::new(
            store,
            config.sessions.clone(),
            Arc::clone(&sink),
        ));
        let locks = Arc::new(SessionLockMap::new());
        let cancel = Arc::new(RunCancelMap::new());

        let agent_loop = Arc::new(AgentLoop::new(
            config.agent_loop.clone(),
            system_prompt,
            Arc::clone(&router),
            orchestrator,
            context,
            subagents,
            Arc::clone(&sessions),
            tools,
            locks,
            Arc::clone(&cancel),
            sink,
        ));

        Ok(Self {
            agent_loop,
            sessions,
            router,
            cancel,
        })
    }

    /// Handle one inbound message: spawns the run and returns its chunk
    /// stream. Runs against the same session key queue behind each other.
    pub fn handle_message(
        &self,
        session_key: impl Into<String>,
        text: impl Into<String>,
    ) -> mpsc::Receiver<AgentChunk> {
        Arc::clone(&self.agent_loop).start(RunInput {
            session_key: session_key.into(),
            user_message: text.into(),
        })
    }

    /// Interrupt the in-flight run for a session, if any.
    pub fn cancel_run(&self, session_key: &str) -> bool {
        self.cancel.cancel(session_key)
    }

    /// Move sessions idle past the configured window out of the working
    /// set. Intended to be called from a periodic task.
    pub fn evict_idle_sessions(&self) -> Result<Vec<String>> {
        self.sessions.evict_idle(chrono::Utc::now())
    }

    /// Archive a session's history and start fresh under the same key.
    pub fn reset_session(&self, session_key: &str) -> Result<()> {
        self.sessions.reset(session_key).map(|_| ())
    }
}
