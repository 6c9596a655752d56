//! Provider selection and failover for the Talon core.
//!
//! The [`ModelRouter`] turns a task classification into an ordered candidate
//! list, the [`FallbackOrchestrator`] walks that list with per-provider
//! timeouts and circuit breakers, and the [`ProviderRegistry`] holds the
//! [`LlmClient`] capability per provider. No concrete SDK or HTTP adapter
//! lives here; clients are injected.

pub mod fallback;
pub mod health;
pub mod registry;
pub mod router;
pub mod traits;

pub use fallback::FallbackOrchestrator;
pub use health::{Clock, HealthRegistry, SystemClock};
pub use registry::ProviderRegistry;
pub use router::{Complexity, ModelRouter, ProviderCandidate, TaskType, Tier};
pub use traits::{ChatOptions, ChatRequest, ChatResponse, LlmClient, Usage};
