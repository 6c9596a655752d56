//! Per-provider circuit breaker state.
//!
//! Each provider carries a consecutive-failure counter; once it reaches the
//! configured threshold the circuit opens and the provider is skipped until
//! the cooldown elapses. Only retryable failures count; a single success
//! resets the counter. Time comes from an injected [`Clock`] so tests can
//! advance it manually instead of sleeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use talon_domain::config::FallbackConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct ProviderHealth {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Tracks failure state for every provider seen by the fallback path.
///
/// The outer map is touched only to create an entry on first sight; after
/// that each provider has its own lock, so recording one provider's failure
/// never blocks a check on another.
pub struct HealthRegistry {
    providers: RwLock<HashMap<String, Arc<Mutex<ProviderHealth>>>>,
    failure_threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl HealthRegistry {
    pub fn new(config: &FallbackConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_millis(config.cooldown_ms),
            clock,
        }
    }

    fn entry(&self, provider_id: &str) -> Arc<Mutex<ProviderHealth>> {
        if let Some(entry) = self.providers.read().get(provider_id) {
            return Arc::clone(entry);
        }
        let mut map = self.providers.write();
        Arc::clone(map.entry(provider_id.to_string()).or_default())
    }

    /// Remaining cooldown when the provider's circuit is open, else `None`.
    /// An elapsed cooldown closes the circuit in place (half-open: the next
    /// attempt probes the provider).
    pub fn open_remaining(&self, provider_id: &str) -> Option<Duration> {
        let entry = self.entry(provider_id);
        let mut health = entry.lock();
        let until = health.open_until?;
        let now = self.clock.now();
        if now >= until {
            health.open_until = None;
            health.consecutive_failures = 0;
            return None;
        }
        Some(until - now)
    }

    /// One success closes the loop on prior flakiness.
    pub fn record_success(&self, provider_id: &str) {
        let entry = self.entry(provider_id);
        let mut health = entry.lock();
        health.consecutive_failures = 0;
        health.open_until = None;
    }

    /// Record a retryable failure. Returns `true` when this failure opened
    /// the circuit. Non-retryable failures (auth, malformed request) must not
    /// be recorded here: retrying them cannot succeed, so they carry no
    /// signal about provider health.
    pub fn record_failure(&self, provider_id: &str) -> bool {
        let entry = self.entry(provider_id);
        let mut health = entry.lock();
        health.consecutive_failures += 1;
        if health.consecutive_failures >= self.failure_threshold && health.open_until.is_none() {
            health.open_until = Some(self.clock.now() + self.cooldown);
            return true;
        }
        false
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::Clock;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    /// Manually advanced clock so breaker tests never sleep.
    pub struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }
}
