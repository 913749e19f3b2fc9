//! Provider orchestration: candidate selection, per-provider retry, and
//! fallback to the next candidate until one succeeds or all are exhausted.

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::dispatch::registry::ProviderRegistry;
use crate::dispatch::retry::{RetryPolicy, invoke_with_retry};
use crate::dispatch::{ProviderRequest, SamplingOptions, Usage};
use crate::error::RelayError;
use crate::rate_limit::RateLimitTracker;
use crate::router::OperationRouter;

/// One generation request. Immutable once submitted.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub sampling: SamplingOptions,
    /// Try this provider first when it is configured and not cooling down.
    pub preferred_provider: Option<String>,
    /// Logical label of the calling use case, consulted by the operation router.
    pub operation: Option<String>,
}

impl Request {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// Successful outcome of [`Orchestrator::send_request`].
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub text: String,
    pub usage: Option<Usage>,
    /// Registry name of the provider that answered.
    pub provider: String,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Defaults merged under each request's own sampling options.
    pub sampling: SamplingOptions,
    pub retry: RetryPolicy,
    /// Upper bound on distinct providers tried per request.
    pub max_provider_attempts: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            sampling: SamplingOptions::default(),
            retry: RetryPolicy::default(),
            max_provider_attempts: crate::config::DEFAULT_MAX_PROVIDER_ATTEMPTS,
        }
    }
}

/// Explicit process context: registry, router and rate-limit state, built
/// once at startup and shared by reference.
pub struct Orchestrator {
    registry: ProviderRegistry,
    router: OperationRouter,
    limits: Arc<RateLimitTracker>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: ProviderRegistry,
        router: OperationRouter,
        limits: Arc<RateLimitTracker>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            router,
            limits,
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let registry = ProviderRegistry::from_config(config)?;
        let router =
            OperationRouter::from_routes(config.routes.clone(), config.default_provider.clone());
        let limits = Arc::new(RateLimitTracker::new(config.rate_limit));
        let settings = OrchestratorSettings {
            sampling: config.sampling.clone(),
            retry: RetryPolicy::new(config.max_retries),
            max_provider_attempts: config.max_provider_attempts,
        };
        Ok(Self::new(registry, router, limits, settings))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn router(&self) -> &OperationRouter {
        &self.router
    }

    pub fn limits(&self) -> &RateLimitTracker {
        &self.limits
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Candidate providers for `req`, in the order they would be tried.
    pub fn candidates_for(&self, req: &Request) -> Vec<String> {
        self.registry.select_candidates(
            req.preferred_provider.as_deref(),
            req.operation.as_deref(),
            &self.router,
            &self.limits,
        )
    }

    /// Run one request against the candidate list until a provider answers.
    ///
    /// Errors:
    /// - `NotConfigured` when no provider has credentials at all
    /// - `NoProvidersAvailable` when every configured provider is cooling down
    /// - `AllProvidersFailed` wrapping the last underlying failure otherwise
    pub async fn send_request(&self, req: &Request) -> Result<Response, RelayError> {
        if !self.registry.has_configured() {
            return Err(RelayError::NotConfigured(
                "no providers configured; set at least one provider API key".to_string(),
            ));
        }

        let candidates = self.candidates_for(req);
        if candidates.is_empty() {
            return Err(RelayError::NoProvidersAvailable {
                cooling: self.limits.cooling_providers(),
            });
        }

        let provider_req = ProviderRequest {
            prompt: req.prompt.clone(),
            system_prompt: req.system_prompt.clone(),
            sampling: req.sampling.merged_over(&self.settings.sampling),
        };

        let mut attempts = 0usize;
        let mut last_error = None;

        for name in &candidates {
            if attempts >= self.settings.max_provider_attempts {
                break;
            }
            // Skipped providers do not count against the attempt budget.
            // Another in-flight request may have cooled this provider down since selection.
            if self.limits.is_cooling_down(name) {
                tracing::debug!(provider = %name, "skipping provider that started cooling down");
                continue;
            }
            let Some(entry) = self.registry.get(name) else {
                continue;
            };

            attempts += 1;
            tracing::debug!(provider = %name, attempt = attempts, "dispatching request");

            match invoke_with_retry(
                name,
                entry.provider.as_ref(),
                &provider_req,
                &self.settings.retry,
                &self.limits,
            )
            .await
            {
                Ok(result) => {
                    return Ok(Response {
                        text: result.text,
                        usage: result.usage,
                        provider: name.clone(),
                        model: result.model,
                        finish_reason: result.finish_reason,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %name,
                        attempt = attempts,
                        error = %e,
                        "provider exhausted, trying next candidate"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(RelayError::AllProvidersFailed {
                attempts,
                last: Box::new(last),
            }),
            None => Err(RelayError::NoProvidersAvailable {
                cooling: self.limits.cooling_providers(),
            }),
        }
    }

    /// Ask a provider to rewrite `original` so that it yields output matching
    /// `desired`, given the response that missed.
    pub async fn refine_prompt(
        &self,
        original: &str,
        failed_response: &str,
        desired: &str,
    ) -> Result<String, RelayError> {
        let prompt = format!(
            "The following prompt produced a response that did not meet the requirements.\n\n\
             <original_prompt>\n{original}\n</original_prompt>\n\n\
             <response>\n{failed_response}\n</response>\n\n\
             <requirements>\n{desired}\n</requirements>\n\n\
             Rewrite the prompt so that a language model following it will produce a response \
             meeting the requirements. Reply with the improved prompt only."
        );
        let req = Request::new(prompt)
            .with_system_prompt(
                "You are an expert prompt engineer. You return only the improved prompt text.",
            )
            .with_operation("refine-prompt");
        let response = self.send_request(&req).await?;
        Ok(response.text.trim().to_string())
    }
}
