//! Session state.
//!
//! One [`Session`] is one logical conversation, keyed by sender or group
//! identity. Its message log is append-only from the loop's perspective and
//! only the `Run` call holding the session lock mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use talon_domain::message::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle states
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a session sits in its lifecycle.
///
/// `Created → Active` on the first processed message; `Active → Idle` after
/// the inactivity timeout (the session is persisted then evicted from
/// working memory); `Idle → Resumed → Active` when a new message arrives and
/// history is reloaded from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Idle,
    Resumed,
}

/// How hard the model should think for this session, when overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

/// Per-session configuration overrides. Unset fields fall back to the
/// global config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    /// Forced model as `"provider_id/model_name"`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking_level: Option<ThinkingLevel>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable opaque id, minted once at creation.
    pub id: String,
    /// Routing key: sender identity for DMs, group identity for groups.
    pub session_key: String,
    pub state: SessionState,
    /// Full message log. Compression replaces old entries with a summary;
    /// nothing else removes from it.
    pub messages: Vec<Message>,
    /// Rolling compressed-history summary, bounded by the summary budget.
    #[serde(default)]
    pub memory_summary: Option<String>,
    #[serde(default)]
    pub overrides: SessionOverrides,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Model used by the most recent completed run.
    #[serde(default)]
    pub current_model: Option<String>,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
}

impl Session {
    pub fn new(session_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_key: session_key.into(),
            state: SessionState::Created,
            messages: Vec::new(),
            memory_summary: None,
            overrides: SessionOverrides::default(),
            created_at: now,
            last_active_at: now,
            current_model: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Append a batch of messages as one unit and refresh the activity
    /// timestamp. An assistant message with tool calls and its tool results
    /// always arrive here together.
    pub fn append_messages(&mut self, batch: impl IntoIterator<Item = Message>) {
        self.messages.extend(batch);
        self.touch();
    }

    /// Minutes since the session last saw activity.
    pub fn idle_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_active_at).num_minutes()
    }

    /// Add one run's token usage and cost to the lifetime counters.
    pub fn record_usage(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
        self.total_cost_usd += cost_usd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_domain::message::Message;

    #[test]
    fn new_session_starts_created() {
        let session = Session::new("agent:bot:dm:alice");
        assert_eq!(session.state, SessionState::Created);
        assert!(session.messages.is_empty());
        assert!(session.memory_summary.is_none());
    }

    #[test]
    fn append_batch_updates_activity() {
        let mut session = Session::new("k");
        let before = session.last_active_at;
        session.append_messages([Message::user("hi"), Message::assistant("hello")]);
        assert_eq!(session.message_count(), 2);
        assert!(session.last_active_at >= before);
    }

    #[test]
    fn usage_accumulates() {
        let mut session = Session::new("k");
        session.record_usage(100, 50, 0.001);
        session.record_usage(200, 25, 0.002);
        assert_eq!(session.total_input_tokens, 300);
        assert_eq!(session.total_output_tokens, 75);
        assert!((session.total_cost_usd - 0.003).abs() < 1e-12);
    }
}
