use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::dispatch::{Provider, ProviderRequest, ProviderResult, Usage};
use crate::error::RelayError;

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Anthropic requires max_tokens on every request.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u64 = 8192;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire format spoken by an HTTP provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiFormat {
    /// OpenAI-compatible chat completions (default for most providers).
    #[default]
    OpenAi,
    /// Anthropic Messages API (different headers and response shape).
    Anthropic,
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicMessage {
    content: Vec<AnthropicBlock>,
    model: Option<String>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// reqwest-backed provider for OpenAI-compatible and Anthropic endpoints.
pub struct HttpProvider {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    api_format: ApiFormat,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RelayError::NotConfigured(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            name: settings.name.clone(),
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            model: settings.model.clone(),
            api_format: settings.api_format,
            timeout,
        })
    }

    fn build_body(&self, req: &ProviderRequest) -> serde_json::Value {
        let s = &req.sampling;
        match self.api_format {
            ApiFormat::OpenAi => {
                let mut messages = Vec::new();
                if let Some(ref system) = req.system_prompt {
                    messages.push(serde_json::json!({"role": "system", "content": system}));
                }
                messages.push(serde_json::json!({"role": "user", "content": req.prompt}));

                let mut body = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                });
                insert_opt(&mut body, "temperature", s.temperature);
                insert_opt(&mut body, "max_tokens", s.max_tokens);
                insert_opt(&mut body, "top_p", s.top_p);
                insert_opt(&mut body, "presence_penalty", s.presence_penalty);
                insert_opt(&mut body, "frequency_penalty", s.frequency_penalty);
                body
            }
            ApiFormat::Anthropic => {
                let mut body = serde_json::json!({
                    "model": self.model,
                    "max_tokens": s.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
                    "messages": [{"role": "user", "content": req.prompt}],
                });
                insert_opt(&mut body, "system", req.system_prompt.clone());
                insert_opt(&mut body, "temperature", s.temperature);
                insert_opt(&mut body, "top_p", s.top_p);
                body
            }
        }
    }

    fn parse_body(&self, bytes: &[u8]) -> Result<ProviderResult, RelayError> {
        match self.api_format {
            ApiFormat::OpenAi => {
                let completion: ChatCompletion = serde_json::from_slice(bytes).map_err(|e| {
                    RelayError::SchemaParse(format!("failed to parse response: {e}"))
                })?;
                let usage = completion.usage.map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                });
                let choice = completion
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.upstream("empty choices", None))?;
                let text = choice
                    .message
                    .content
                    .ok_or_else(|| self.upstream("null content", None))?;
                Ok(ProviderResult {
                    text,
                    usage,
                    model: completion.model,
                    finish_reason: choice.finish_reason,
                })
            }
            ApiFormat::Anthropic => {
                let message: AnthropicMessage = serde_json::from_slice(bytes).map_err(|e| {
                    RelayError::SchemaParse(format!("failed to parse response: {e}"))
                })?;
                let text: String = message
                    .content
                    .into_iter()
                    .filter(|b| b.block_type == "text")
                    .filter_map(|b| b.text)
                    .collect();
                if text.is_empty() {
                    return Err(self.upstream("no text content blocks", None));
                }
                Ok(ProviderResult {
                    text,
                    usage: message.usage.map(|u| Usage {
                        input_tokens: u.input_tokens,
                        output_tokens: u.output_tokens,
                    }),
                    model: message.model,
                    finish_reason: message.stop_reason,
                })
            }
        }
    }

    fn upstream(&self, message: &str, status: Option<u16>) -> RelayError {
        RelayError::Upstream {
            provider: self.name.clone(),
            message: message.to_string(),
            status,
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn complete(&self, req: &ProviderRequest) -> Result<ProviderResult, RelayError> {
        let start = Instant::now();
        let body = self.build_body(req);

        let mut request = self
            .client
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body);
        request = match self.api_format {
            ApiFormat::OpenAi => {
                request.header("Authorization", format!("Bearer {}", self.api_key))
            }
            ApiFormat::Anthropic => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::Timeout(start.elapsed().as_millis() as u64)
            } else {
                RelayError::Request(e)
            }
        })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RelayError::RateLimited {
                provider: self.name.clone(),
                retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RelayError::AuthFailed {
                provider: self.name.clone(),
                message: format!("{status}"),
            });
        }

        // Catch-all for any non-success status (4xx, 5xx, 3xx that wasn't followed)
        // Cap error body reads to MAX_RESPONSE_BYTES to prevent memory exhaustion
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            return Err(self.upstream(&format!("{status}: {text}"), Some(status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.upstream(&format!("failed to read response body: {e}"), None))?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(self.upstream(
                &format!(
                    "response too large: {} bytes (max {})",
                    bytes.len(),
                    MAX_RESPONSE_BYTES
                ),
                None,
            ));
        }

        let result = self.parse_body(&bytes)?;
        tracing::debug!(
            provider = %self.name,
            model = ?result.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "provider call completed"
        );
        Ok(result)
    }
}

fn insert_opt<T: serde::Serialize>(body: &mut serde_json::Value, key: &str, value: Option<T>) {
    if let Some(v) = value
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert(key.to_string(), serde_json::json!(v));
    }
}
