use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the core consumes at construction time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent_loop: LoopConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub subagents: SubagentConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Config {
    /// Load a TOML config file. A missing file yields the defaults so a
    /// fresh deployment runs without one.
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| crate::error::Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum tool-executing iterations before the loop force-stops with a
    /// truncation warning.
    #[serde(default = "d_10")]
    pub max_iterations: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fallback orchestrator & circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Hard per-provider timeout, measured from the start of the call.
    #[serde(default = "d_90000")]
    pub request_timeout_ms: u64,
    /// Consecutive retryable failures before a provider's circuit opens.
    #[serde(default = "d_3")]
    pub failure_threshold: u32,
    /// How long an open circuit excludes the provider.
    #[serde(default = "d_60000")]
    pub cooldown_ms: u64,
    /// Fixed delay between successive candidate attempts (not applied after
    /// the last candidate).
    #[serde(default = "d_500")]
    pub attempt_backoff_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 90_000,
            failure_threshold: 3,
            cooldown_ms: 60_000,
            attempt_backoff_ms: 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context & compression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Context window assumed for budget math when a model does not
    /// advertise one.
    #[serde(default = "d_128000")]
    pub context_window_tokens: u32,
    /// Tokens reserved for the response and system overhead.
    #[serde(default = "d_4096")]
    pub reserved_tokens: u32,
    /// Compression triggers when estimated history tokens exceed
    /// `(window - reserved) * threshold`.
    #[serde(default = "d_0_8")]
    pub compress_threshold: f32,
    /// Token cap for the rolling memory summary.
    #[serde(default = "d_800")]
    pub summary_budget_tokens: u32,
    /// Messages kept verbatim when compressing older history.
    #[serde(default = "d_10u")]
    pub keep_recent_messages: usize,
    /// Recent messages included verbatim in each assembled context.
    #[serde(default = "d_8u")]
    pub recent_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: 128_000,
            reserved_tokens: 4_096,
            compress_threshold: 0.8,
            summary_budget_tokens: 800,
            keep_recent_messages: 10,
            recent_messages: 8,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    /// Concurrent sub-agent calls allowed in one parallel batch.
    #[serde(default = "d_4u")]
    pub max_concurrent: usize,
    /// Wall-clock timeout per sub-agent run (shorter than the main loop's).
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout_ms: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Minutes of inactivity before a session is persisted and evicted.
    #[serde(default = "d_30")]
    pub idle_minutes: u32,
    /// How group messages are gated before the loop is invoked. The gate is
    /// evaluated by the gateway; the loop assumes every call is worth
    /// processing.
    #[serde(default)]
    pub group_gate: GroupGate,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_minutes: 30,
            group_gate: GroupGate::Mention,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupGate {
    /// Only process group messages that address the agent.
    #[default]
    Mention,
    /// Process every group message.
    Always,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers, tiers, pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Registered providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Ordered failover model lists per tier. Entries are
    /// `"provider_id/model_name"`.
    #[serde(default)]
    pub tiers: TierConfig,
    /// Per-model pricing for cost estimation (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Per-model advertised context windows (tokens). Models absent from the
    /// map fall back to `ContextConfig::context_window_tokens`.
    #[serde(default)]
    pub context_windows: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

impl AuthConfig {
    /// Resolve the credential. Returns `None` when the env var is unset or a
    /// configuration placeholder (`${...}`) was never substituted; callers
    /// must exclude the provider loudly, never silently.
    pub fn resolve(&self) -> Option<String> {
        if let Some(key) = &self.key {
            if is_placeholder(key) || key.is_empty() {
                return None;
            }
            return Some(key.clone());
        }
        let var = self.env.as_deref()?;
        match std::env::var(var) {
            Ok(v) if !v.is_empty() && !is_placeholder(&v) => Some(v),
            _ => None,
        }
    }
}

fn is_placeholder(value: &str) -> bool {
    value.contains("${")
}

/// Ordered failover model lists, one list per cost tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TierConfig {
    #[serde(default)]
    pub cheap: Vec<String>,
    #[serde(default)]
    pub mid: Vec<String>,
    #[serde(default)]
    pub premium: Vec<String>,
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPricing {
    /// Estimated cost in USD. Pure: never calls a provider.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_10() -> u32 {
    10
}
fn d_3() -> u32 {
    3
}
fn d_30() -> u32 {
    30
}
fn d_90000() -> u64 {
    90_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_500() -> u64 {
    500
}
fn d_128000() -> u32 {
    128_000
}
fn d_4096() -> u32 {
    4_096
}
fn d_800() -> u32 {
    800
}
fn d_0_8() -> f32 {
    0.8
}
fn d_4u() -> usize {
    4
}
fn d_8u() -> usize {
    8
}
fn d_10u() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_resolve_direct_key() {
        let auth = AuthConfig {
            env: None,
            key: Some("sk-real".into()),
        };
        assert_eq!(auth.resolve().as_deref(), Some("sk-real"));
    }

    #[test]
    fn auth_resolve_rejects_placeholder() {
        let auth = AuthConfig {
            env: None,
            key: Some("${OPENAI_API_KEY}".into()),
        };
        assert!(auth.resolve().is_none());
    }

    #[test]
    fn auth_resolve_missing_env_is_none() {
        let auth = AuthConfig {
            env: Some("TALON_TEST_UNSET_VAR_XYZ".into()),
            key: None,
        };
        assert!(auth.resolve().is_none());
    }

    #[test]
    fn pricing_estimate() {
        let pricing = ModelPricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        };
        let cost = pricing.estimate_cost(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9);
        assert_eq!(pricing.estimate_cost(0, 0), 0.0);
    }
}
