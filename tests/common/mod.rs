//! Scripted in-process providers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use taskrelay::dispatch::registry::ProviderRegistry;
use taskrelay::dispatch::retry::RetryPolicy;
use taskrelay::dispatch::{Provider, ProviderRequest, ProviderResult};
use taskrelay::error::RelayError;
use taskrelay::orchestrator::{Orchestrator, OrchestratorSettings};
use taskrelay::rate_limit::{RateLimitConfig, RateLimitTracker};
use taskrelay::router::OperationRouter;

/// Plays back a fixed list of outcomes, then repeats `fallback` forever.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, RelayError>>>,
    fallback: String,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self::replying(name, "[]")
    }

    pub fn replying(name: &str, fallback: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then_ok(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn then_err(self, err: RelayError) -> Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `complete` calls observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, req: &ProviderRequest) -> Result<ProviderResult, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        self.active.fetch_sub(1, Ordering::SeqCst);
        match next {
            Some(Ok(text)) => Ok(ProviderResult::text(text)),
            Some(Err(e)) => Err(e),
            None => Ok(ProviderResult {
                text: self.fallback.clone(),
                usage: None,
                model: Some(format!("{}-model", self.name)),
                finish_reason: Some("stop".to_string()),
            }),
        }
    }
}

pub fn rate_limited(provider: &str) -> RelayError {
    RelayError::RateLimited {
        provider: provider.to_string(),
        retry_after: None,
    }
}

pub fn transient(provider: &str) -> RelayError {
    RelayError::Upstream {
        provider: provider.to_string(),
        message: "503 Service Unavailable".to_string(),
        status: Some(503),
    }
}

pub fn fatal(provider: &str) -> RelayError {
    RelayError::AuthFailed {
        provider: provider.to_string(),
        message: "invalid api key".to_string(),
    }
}

/// Fast retry policy for tests (paused clock or not).
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
    }
}

pub fn tracker() -> Arc<RateLimitTracker> {
    Arc::new(RateLimitTracker::new(RateLimitConfig::new(
        Duration::from_secs(10),
        Duration::from_secs(60),
    )))
}

/// Registry with every provider marked configured.
pub fn registry(providers: &[(&str, Arc<ScriptedProvider>)]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (name, provider) in providers {
        registry
            .register(name, Arc::clone(provider) as Arc<dyn Provider>, true)
            .unwrap();
    }
    registry
}

pub fn orchestrator(
    providers: &[(&str, Arc<ScriptedProvider>)],
    router: OperationRouter,
    settings: OrchestratorSettings,
) -> Orchestrator {
    Orchestrator::new(registry(providers), router, tracker(), settings)
}

pub fn settings(max_retries: u32, max_provider_attempts: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        retry: fast_retry(max_retries),
        max_provider_attempts,
        ..Default::default()
    }
}
