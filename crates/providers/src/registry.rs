//! Provider registry.
//!
//! Holds the injected [`LlmClient`] per provider id and resolves credentials
//! at construction. Providers whose credentials do not resolve (missing env
//! var, `${...}` placeholder that was never substituted) are kept out of the
//! usable set and logged at warn; dropping a misconfigured provider without
//! any signal would be a correctness defect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use talon_domain::config::LlmConfig;

use crate::traits::LlmClient;

/// Holds all injected LLM clients, indexed by stable provider id.
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn LlmClient>>,
    usable: HashSet<String>,
}

impl ProviderRegistry {
    /// Build the registry from injected clients plus the provider config.
    ///
    /// A client is usable when its config entry's credentials resolve, or
    /// when it has no config entry at all (test stubs, local models that
    /// need no auth).
    pub fn new(clients: Vec<Arc<dyn LlmClient>>, config: &LlmConfig) -> Self {
        let mut map: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
        let mut usable = HashSet::new();

        for client in clients {
            let id = client.provider_id().to_string();
            match config.providers.iter().find(|p| p.id == id) {
                Some(pc) if pc.auth.resolve().is_none() && has_auth(pc) => {
                    tracing::warn!(
                        provider_id = %id,
                        "provider credentials unresolved (missing env var or \
                         unsubstituted placeholder); excluding from routing"
                    );
                }
                _ => {
                    usable.insert(id.clone());
                }
            }
            map.insert(id, client);
        }

        tracing::info!(
            registered = map.len(),
            usable = usable.len(),
            "provider registry built"
        );

        Self {
            clients: map,
            usable,
        }
    }

    /// Look up a client by its provider id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmClient>> {
        self.clients.get(provider_id).cloned()
    }

    /// Provider ids with resolved credentials, the router's candidate pool.
    pub fn usable_providers(&self) -> HashSet<String> {
        self.usable.clone()
    }

    /// Number of registered clients (usable or not).
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Whether the provider declares any auth at all. Entries with neither an
/// env var nor a key are treated as auth-less (local models).
fn has_auth(pc: &talon_domain::config::ProviderConfig) -> bool {
    pc.auth.env.is_some() || pc.auth.key.is_some()
}
