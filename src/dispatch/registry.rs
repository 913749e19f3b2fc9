use std::collections::HashSet;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Provider;
use crate::dispatch::http::HttpProvider;
use crate::error::RelayError;
use crate::rate_limit::RateLimitTracker;
use crate::router::OperationRouter;

/// Hand-maintained fallback order, best quality/cost tradeoff first.
pub const FALLBACK_PRIORITY: &[&str] = &[
    "anthropic",
    "openai",
    "google",
    "perplexity",
    "xai",
    "mistral",
    "openrouter",
];

/// One provider known to the process. Registrations are never removed.
#[derive(Clone)]
pub struct ProviderRegistration {
    pub name: String,
    pub provider: Arc<dyn Provider>,
    pub configured: bool,
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.name)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

/// Providers in registration order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderRegistration>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every known provider from config, configured or not.
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let mut registry = Self::new();
        for settings in &config.providers {
            let configured = settings.api_key.is_some();
            let provider = HttpProvider::new(settings, config.request_timeout)?;
            registry.register(&settings.name, Arc::new(provider), configured)?;
        }

        let configured = registry.configured_names();
        if configured.is_empty() {
            tracing::error!("no providers configured; set at least one provider API key");
        } else {
            tracing::info!(providers = ?configured, "providers configured");
        }
        Ok(registry)
    }

    /// Add a provider. Names must be unique.
    pub fn register(
        &mut self,
        name: &str,
        provider: Arc<dyn Provider>,
        configured: bool,
    ) -> Result<(), RelayError> {
        if self.get(name).is_some() {
            return Err(RelayError::NotConfigured(format!(
                "provider registered twice: {name}"
            )));
        }
        self.entries.push(ProviderRegistration {
            name: name.to_string(),
            provider,
            configured,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ProviderRegistration> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.configured)
    }

    pub fn has_configured(&self) -> bool {
        self.entries.iter().any(|e| e.configured)
    }

    pub fn configured_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.configured)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Suggest similar provider names for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep log lines readable.
    pub fn suggest_providers(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.name.clone())
            .filter(|k| {
                let k_lower = k.to_lowercase();
                k_lower.contains(&q) || q.contains(&k_lower)
            })
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }

    /// Ordered, duplicate-free candidate list for one request.
    ///
    /// Order: preferred provider, else the provider routed for `operation`;
    /// then the default provider; then [`FALLBACK_PRIORITY`]; then any other
    /// configured provider in registration order. Unconfigured and
    /// cooling-down providers never appear. An empty result means "no
    /// providers available right now".
    pub fn select_candidates(
        &self,
        preferred: Option<&str>,
        operation: Option<&str>,
        router: &OperationRouter,
        limits: &RateLimitTracker,
    ) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut candidates = Vec::new();

        let mut push = |name: &str, candidates: &mut Vec<String>| -> bool {
            let Some(entry) = self.get(name) else {
                return false;
            };
            if !entry.configured || limits.is_cooling_down(name) {
                return false;
            }
            if !seen.insert(entry.name.as_str()) {
                return false;
            }
            candidates.push(entry.name.clone());
            true
        };

        let preferred_taken = match preferred {
            Some(name) => {
                let taken = push(name, &mut candidates);
                if !taken && self.get(name).is_none() {
                    tracing::warn!(
                        provider = name,
                        suggestions = ?self.suggest_providers(name),
                        "preferred provider is not registered"
                    );
                }
                taken
            }
            None => false,
        };

        if !preferred_taken
            && let Some(op) = operation
            && let Some(routed) = router.route_for(op)
        {
            push(routed, &mut candidates);
        }

        if let Some(default) = router.default_provider() {
            push(default, &mut candidates);
        }

        for name in FALLBACK_PRIORITY {
            push(name, &mut candidates);
        }

        for entry in &self.entries {
            push(&entry.name, &mut candidates);
        }

        tracing::debug!(
            ?preferred,
            ?operation,
            candidates = ?candidates,
            "selected provider candidates"
        );
        candidates
    }
}
