//! Sequential failover across an ordered candidate list.
//!
//! One logical request walks the candidates the router produced: open
//! circuits are skipped, each live attempt runs under a hard timeout, and
//! retryable failures feed the provider's breaker. Non-retryable failures
//! (bad key, malformed request) advance the chain without penalizing the
//! provider. Exhaustion returns every attempt's failure, enumerated.

use std::sync::Arc;
use std::time::Duration;

use talon_domain::error::{AttemptFailure, Error, ProviderErrorKind, Result};
use talon_domain::trace::{EventSink, TraceEvent};

use crate::health::HealthRegistry;
use crate::registry::ProviderRegistry;
use crate::router::ProviderCandidate;
use crate::traits::{ChatRequest, ChatResponse};

pub struct FallbackOrchestrator {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthRegistry>,
    request_timeout: Duration,
    attempt_backoff: Duration,
    failure_threshold: u32,
    sink: Arc<dyn EventSink>,
}

impl FallbackOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthRegistry>,
        config: &talon_domain::config::FallbackConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            health,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            attempt_backoff: Duration::from_millis(config.attempt_backoff_ms),
            failure_threshold: config.failure_threshold,
            sink,
        }
    }

    /// Walk the candidates in order until one succeeds.
    ///
    /// Returns the first successful response, or
    /// [`Error::ExhaustedFallback`] carrying one [`AttemptFailure`] per
    /// candidate (failed or skipped) when none did. An empty candidate list
    /// is a routing bug surfaced as [`Error::NoCandidates`].
    pub async fn execute(
        &self,
        candidates: &[ProviderCandidate],
        request: ChatRequest,
    ) -> Result<ChatResponse> {
        if candidates.is_empty() {
            return Err(Error::NoCandidates(
                "fallback invoked with an empty candidate list".into(),
            ));
        }

        let mut attempts: Vec<AttemptFailure> = Vec::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            // Open circuit: record the skip and move on, no backoff.
            if let Some(remaining) = self.health.open_remaining(&candidate.provider_id) {
                tracing::debug!(
                    provider_id = %candidate.provider_id,
                    model = %candidate.model,
                    remaining_ms = remaining.as_millis() as u64,
                    "skipping candidate, circuit open"
                );
                attempts.push(AttemptFailure {
                    provider_id: candidate.provider_id.clone(),
                    model: candidate.model.clone(),
                    kind: None,
                    message: format!("circuit open for another {}ms", remaining.as_millis()),
                });
                continue;
            }

            match self.try_candidate(candidate, &request).await {
                Ok(response) => {
                    self.health.record_success(&candidate.provider_id);
                    if !attempts.is_empty() {
                        tracing::info!(
                            provider_id = %candidate.provider_id,
                            model = %candidate.model,
                            prior_failures = attempts.len(),
                            "fallback candidate succeeded"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    let kind = err
                        .provider_kind()
                        .unwrap_or(ProviderErrorKind::ServerError);

                    if kind.is_retryable() {
                        let opened = self.health.record_failure(&candidate.provider_id);
                        if opened {
                            self.sink.emit(&TraceEvent::ProviderCircuitOpen {
                                provider_id: candidate.provider_id.clone(),
                                consecutive_failures: self.failure_threshold,
                                cooldown_ms: self.health.cooldown().as_millis() as u64,
                            });
                            tracing::warn!(
                                provider_id = %candidate.provider_id,
                                cooldown_ms = self.health.cooldown().as_millis() as u64,
                                "provider circuit opened"
                            );
                        }
                    }

                    tracing::warn!(
                        provider_id = %candidate.provider_id,
                        model = %candidate.model,
                        kind = %kind,
                        error = %err,
                        "candidate failed, advancing fallback chain"
                    );

                    if let Some(next) = candidates.get(idx + 1) {
                        self.sink.emit(&TraceEvent::ProviderFallback {
                            from_provider: candidate.provider_id.clone(),
                            from_model: candidate.model.clone(),
                            to_provider: next.provider_id.clone(),
                            to_model: next.model.clone(),
                            reason: kind.to_string(),
                        });
                    }

                    attempts.push(AttemptFailure {
                        provider_id: candidate.provider_id.clone(),
                        model: candidate.model.clone(),
                        kind: Some(kind),
                        message: err.to_string(),
                    });

                    // Fixed pause before the next live attempt; pointless
                    // after the last candidate.
                    if idx + 1 < candidates.len() && !self.attempt_backoff.is_zero() {
                        tokio::time::sleep(self.attempt_backoff).await;
                    }
                }
            }
        }

        Err(Error::ExhaustedFallback(attempts))
    }

    /// One attempt against one candidate, under the hard timeout.
    async fn try_candidate(
        &self,
        candidate: &ProviderCandidate,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let client = self.registry.get(&candidate.provider_id).ok_or_else(|| {
            Error::provider(
                &candidate.provider_id,
                ProviderErrorKind::AuthFailed,
                "no client registered for provider",
            )
        })?;

        let mut request = request.clone();
        request.model = Some(candidate.model.clone());

        match tokio::time::timeout(self.request_timeout, client.chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::provider(
                &candidate.provider_id,
                ProviderErrorKind::Timeout,
                format!("no response within {}ms", self.request_timeout.as_millis()),
            )),
        }
    }
}
