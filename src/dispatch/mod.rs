pub mod http;
pub mod queue;
pub mod registry;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Sampling knobs forwarded to the provider. `None` means "provider default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
}

impl SamplingOptions {
    /// Field-by-field overlay: values set on `self` win over `defaults`.
    pub fn merged_over(&self, defaults: &SamplingOptions) -> SamplingOptions {
        SamplingOptions {
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
        }
    }
}

/// Internal request type handed to every provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    /// System prompt to set model behavior (sent as a separate message where supported).
    pub system_prompt: Option<String>,
    pub sampling: SamplingOptions,
}

/// Token accounting as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Internal result type. Every provider returns this.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub text: String,
    pub usage: Option<Usage>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl ProviderResult {
    /// Plain-text result with no metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
            finish_reason: None,
        }
    }
}

/// Uniform contract every upstream adapter satisfies.
///
/// Adapters report failures as typed [`RelayError`] variants so the retry
/// engine can classify them without inspecting message text.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, req: &ProviderRequest) -> Result<ProviderResult, RelayError>;
}
