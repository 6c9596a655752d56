use serde::Serialize;

/// Structured lifecycle events emitted across all Talon crates.
///
/// Events are delivered through an injected [`EventSink`] so tests can
/// construct isolated instances; the sink has no effect on control flow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LoopIteration {
        session_id: String,
        iteration: u32,
        phase: String,
    },
    LoopToolCall {
        session_id: String,
        tool_name: String,
        call_id: String,
    },
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
        coerced_to: String,
    },
    ProviderFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    ProviderCircuitOpen {
        provider_id: String,
        consecutive_failures: u32,
        cooldown_ms: u64,
    },
    ProviderExcluded {
        provider_id: String,
        model: String,
        reason: String,
    },
    CompressionStart {
        session_id: String,
        messages_to_compress: usize,
    },
    CompressionSuccess {
        session_id: String,
        messages_compressed: usize,
        summary_tokens: u32,
    },
    CompressionFailed {
        session_id: String,
        reason: String,
    },
    SessionResolved {
        session_key: String,
        session_id: String,
        is_new: bool,
    },
    SessionIdle {
        session_key: String,
        session_id: String,
        idle_minutes: i64,
    },
    SessionResumed {
        session_key: String,
        session_id: String,
    },
    SessionReset {
        session_key: String,
        old_session_id: String,
        new_session_id: String,
    },
    SubagentSpawned {
        agent_type: String,
        parent_session_id: String,
    },
}

/// Sink for lifecycle events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TraceEvent);
}

/// Default sink: logs each event as one structured JSON line.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &TraceEvent) {
        let json = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(trace_event = %json, "talon_event");
    }
}

/// Discards every event. Useful in tests that assert on behavior only.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &TraceEvent) {}
}

/// A sink that records events in memory for assertions.
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<TraceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &TraceEvent) {
        self.events.lock().push(event.clone());
    }
}
