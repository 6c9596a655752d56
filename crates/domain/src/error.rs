use serde::Serialize;

/// Classification of a provider failure.
///
/// The first three kinds are transient and count toward that provider's
/// circuit breaker; the last two are configuration problems and advance
/// the fallback chain but must not penalize the provider once fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    ServerError,
    AuthFailed,
    MalformedRequest,
}

impl ProviderErrorKind {
    /// Whether this failure should count toward the provider's breaker.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::AuthFailed => "auth_failed",
            Self::MalformedRequest => "malformed_request",
        };
        f.write_str(s)
    }
}

/// One failed (or skipped) candidate inside an exhausted fallback chain.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub model: String,
    /// `None` when the candidate was skipped because its circuit was open.
    pub kind: Option<ProviderErrorKind>,
    pub message: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Some(kind) => write!(
                f,
                "{}/{}: {} ({})",
                self.provider_id, self.model, kind, self.message
            ),
            None => write!(
                f,
                "{}/{}: skipped ({})",
                self.provider_id, self.model, self.message
            ),
        }
    }
}

/// Shared error type used across all Talon crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider {provider}: {kind}: {message}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    /// Every candidate in a fallback chain failed or was skipped.
    /// Each attempt is enumerated so callers can see which providers were
    /// tried and why each failed, never a single opaque error.
    #[error("all {} candidates exhausted: [{}]", .0.len(), format_attempts(.0))]
    ExhaustedFallback(Vec<AttemptFailure>),

    #[error("no candidates available: {0}")]
    NoCandidates(String),

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for provider failures.
    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// The provider error kind, when this is a provider failure.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::Provider { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderErrorKind::Timeout.is_retryable());
        assert!(ProviderErrorKind::RateLimited.is_retryable());
        assert!(ProviderErrorKind::ServerError.is_retryable());
        assert!(!ProviderErrorKind::AuthFailed.is_retryable());
        assert!(!ProviderErrorKind::MalformedRequest.is_retryable());
    }

    #[test]
    fn exhausted_fallback_enumerates_attempts() {
        let err = Error::ExhaustedFallback(vec![
            AttemptFailure {
                provider_id: "openai".into(),
                model: "gpt-4o-mini".into(),
                kind: Some(ProviderErrorKind::Timeout),
                message: "deadline after 90000ms".into(),
            },
            AttemptFailure {
                provider_id: "anthropic".into(),
                model: "claude-haiku".into(),
                kind: None,
                message: "circuit open for another 42s".into(),
            },
        ]);

        let text = err.to_string();
        assert!(text.contains("openai/gpt-4o-mini: timeout"));
        assert!(text.contains("anthropic/claude-haiku: skipped"));
        assert!(text.contains("2 candidates"));
    }
}
