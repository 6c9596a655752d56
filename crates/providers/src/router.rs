//! Task-based model routing.
//!
//! Pure, synchronous decision logic: a task classification maps to a cost
//! tier through a static table, and the tier's ordered model list becomes
//! the fallback chain. No HTTP, no async: every routing decision is
//! enumerable and unit-testable.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use talon_domain::config::{ContextConfig, LlmConfig, ModelPricing};
use talon_domain::trace::{EventSink, TraceEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the call is for. Drives tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Chat,
    Orchestration,
    Subagent,
    Reasoning,
    Summarization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Cost tier a candidate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Cheap,
    Mid,
    Premium,
}

/// One entry in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCandidate {
    pub provider_id: String,
    pub model: String,
    pub tier: Tier,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Static tier table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The routing policy. Sub-agents intentionally never receive premium
/// models regardless of complexity.
pub fn tier_for(task: TaskType, complexity: Complexity) -> Tier {
    match (task, complexity) {
        (TaskType::Chat, Complexity::Low) => Tier::Cheap,
        (TaskType::Chat, _) => Tier::Mid,
        (TaskType::Orchestration, _) => Tier::Mid,
        (TaskType::Subagent, _) => Tier::Cheap,
        (TaskType::Reasoning, Complexity::High) => Tier::Premium,
        (TaskType::Reasoning, _) => Tier::Mid,
        (TaskType::Summarization, _) => Tier::Cheap,
    }
}

/// Split a `"provider_id/model_name"` string into its two components.
///
/// If there is no `/`, the entire string is treated as the provider id and
/// an empty model name is returned (the provider's default will be used).
pub fn resolve_model(model_str: &str) -> (&str, &str) {
    match model_str.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (model_str, ""),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns the static tier tables and per-model pricing.
pub struct ModelRouter {
    llm: LlmConfig,
    context: ContextConfig,
    /// Provider ids whose credentials resolved at registry construction.
    usable_providers: HashSet<String>,
    sink: Arc<dyn EventSink>,
}

impl ModelRouter {
    pub fn new(
        llm: LlmConfig,
        context: ContextConfig,
        usable_providers: HashSet<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            llm,
            context,
            usable_providers,
            sink,
        }
    }

    /// Build the ordered candidate list for a task. The ordering *is* the
    /// fallback chain.
    ///
    /// Candidates are dropped (loudly, never silently) when their
    /// provider's credentials did not resolve, or when the model's
    /// advertised context window cannot hold `input_tokens`.
    pub fn select_candidates(
        &self,
        task: TaskType,
        complexity: Complexity,
        input_tokens: u32,
    ) -> Vec<ProviderCandidate> {
        let tier = tier_for(task, complexity);
        let specs = match tier {
            Tier::Cheap => &self.llm.tiers.cheap,
            Tier::Mid => &self.llm.tiers.mid,
            Tier::Premium => &self.llm.tiers.premium,
        };

        let mut candidates = Vec::with_capacity(specs.len());
        for spec in specs {
            let (provider_id, model) = resolve_model(spec);

            if !self.usable_providers.contains(provider_id) {
                tracing::warn!(
                    provider_id,
                    model,
                    ?task,
                    "excluding candidate: provider credentials unresolved"
                );
                self.sink.emit(&TraceEvent::ProviderExcluded {
                    provider_id: provider_id.to_string(),
                    model: model.to_string(),
                    reason: "credentials unresolved".into(),
                });
                continue;
            }

            let window = self.context_window(provider_id, model);
            if input_tokens > window {
                tracing::warn!(
                    provider_id,
                    model,
                    input_tokens,
                    window,
                    "excluding candidate: input exceeds model context window"
                );
                self.sink.emit(&TraceEvent::ProviderExcluded {
                    provider_id: provider_id.to_string(),
                    model: model.to_string(),
                    reason: format!("input {input_tokens} tokens exceeds window {window}"),
                });
                continue;
            }

            candidates.push(ProviderCandidate {
                provider_id: provider_id.to_string(),
                model: model.to_string(),
                tier,
            });
        }
        candidates
    }

    /// Estimated cost in USD for one call to `candidate`. Pure over the
    /// published per-token rates; never calls a provider. Models without a
    /// pricing entry estimate at zero.
    pub fn estimate_cost(
        &self,
        candidate: &ProviderCandidate,
        input_tokens: u32,
        expected_output_tokens: u32,
    ) -> f64 {
        self.pricing(&candidate.model)
            .map(|p| p.estimate_cost(input_tokens, expected_output_tokens))
            .unwrap_or(0.0)
    }

    /// Pricing entry for a model, if configured.
    pub fn pricing(&self, model: &str) -> Option<&ModelPricing> {
        self.llm.pricing.get(model)
    }

    fn context_window(&self, provider_id: &str, model: &str) -> u32 {
        self.llm
            .providers
            .iter()
            .find(|p| p.id == provider_id)
            .and_then(|p| p.context_windows.get(model).copied())
            .unwrap_or(self.context.context_window_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_domain::config::{AuthConfig, ProviderConfig, TierConfig};
    use talon_domain::trace::NoopSink;

    fn test_router(usable: &[&str]) -> ModelRouter {
        let llm = LlmConfig {
            providers: vec![
                ProviderConfig {
                    id: "openai".into(),
                    auth: AuthConfig::default(),
                    context_windows: [("gpt-4o-mini".to_string(), 128_000)].into(),
                },
                ProviderConfig {
                    id: "local".into(),
                    auth: AuthConfig::default(),
                    context_windows: [("qwen-7b".to_string(), 8_192)].into(),
                },
            ],
            tiers: TierConfig {
                cheap: vec!["openai/gpt-4o-mini".into(), "local/qwen-7b".into()],
                mid: vec!["anthropic/claude-sonnet".into()],
                premium: vec!["anthropic/claude-opus".into()],
            },
            pricing: [(
                "gpt-4o-mini".to_string(),
                ModelPricing {
                    input_per_mtok: 0.15,
                    output_per_mtok: 0.6,
                },
            )]
            .into(),
        };
        ModelRouter::new(
            llm,
            ContextConfig::default(),
            usable.iter().map(|s| s.to_string()).collect(),
            Arc::new(NoopSink),
        )
    }

    #[test]
    fn tier_table_is_explicit() {
        assert_eq!(tier_for(TaskType::Chat, Complexity::Low), Tier::Cheap);
        assert_eq!(tier_for(TaskType::Chat, Complexity::High), Tier::Mid);
        assert_eq!(tier_for(TaskType::Orchestration, Complexity::High), Tier::Mid);
        assert_eq!(tier_for(TaskType::Subagent, Complexity::High), Tier::Cheap);
        assert_eq!(tier_for(TaskType::Reasoning, Complexity::High), Tier::Premium);
        assert_eq!(tier_for(TaskType::Reasoning, Complexity::Low), Tier::Mid);
        assert_eq!(tier_for(TaskType::Summarization, Complexity::High), Tier::Cheap);
    }

    #[test]
    fn candidates_preserve_tier_order() {
        let router = test_router(&["openai", "local", "anthropic"]);
        let candidates = router.select_candidates(TaskType::Chat, Complexity::Low, 1000);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].provider_id, "openai");
        assert_eq!(candidates[1].provider_id, "local");
        assert!(candidates.iter().all(|c| c.tier == Tier::Cheap));
    }

    #[test]
    fn unresolved_provider_excluded() {
        let router = test_router(&["local"]);
        let candidates = router.select_candidates(TaskType::Chat, Complexity::Low, 1000);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider_id, "local");
    }

    #[test]
    fn small_context_window_excluded_for_large_input() {
        let router = test_router(&["openai", "local"]);
        // qwen-7b advertises 8192 tokens; a 20k-token input cannot fit.
        let candidates = router.select_candidates(TaskType::Subagent, Complexity::Low, 20_000);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].model, "gpt-4o-mini");
    }

    #[test]
    fn cost_estimate_is_pure() {
        let router = test_router(&["openai"]);
        let candidate = ProviderCandidate {
            provider_id: "openai".into(),
            model: "gpt-4o-mini".into(),
            tier: Tier::Cheap,
        };
        let cost = router.estimate_cost(&candidate, 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);

        let unpriced = ProviderCandidate {
            provider_id: "openai".into(),
            model: "mystery".into(),
            tier: Tier::Cheap,
        };
        assert_eq!(router.estimate_cost(&unpriced, 1_000_000, 0), 0.0);
    }

    #[test]
    fn resolve_model_splits_on_first_slash() {
        assert_eq!(resolve_model("openai/gpt-4o"), ("openai", "gpt-4o"));
        assert_eq!(resolve_model("bare"), ("bare", ""));
    }
}
