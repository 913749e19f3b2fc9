use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::SamplingOptions;
use crate::dispatch::http::ApiFormat;
use crate::error::RelayError;
use crate::rate_limit::{DEFAULT_BASE_COOLDOWN, DEFAULT_MAX_COOLDOWN, RateLimitConfig};

/// Env var naming an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "TASKRELAY_CONFIG";

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_MAX_PROVIDER_ATTEMPTS: usize = 3;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Static description of a provider this build knows how to talk to.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub name: &'static str,
    /// Prefix for `<PREFIX>_API_KEY`, `<PREFIX>_MODEL`, `<PREFIX>_BASE_URL`, `<PREFIX>_TASKS`.
    pub env_prefix: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub api_format: ApiFormat,
}

pub const KNOWN_PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "anthropic",
        env_prefix: "ANTHROPIC",
        base_url: "https://api.anthropic.com/v1/messages",
        default_model: "claude-sonnet-4-5",
        api_format: ApiFormat::Anthropic,
    },
    ProviderSpec {
        name: "openai",
        env_prefix: "OPENAI",
        base_url: "https://api.openai.com/v1/chat/completions",
        default_model: "gpt-4o",
        api_format: ApiFormat::OpenAi,
    },
    ProviderSpec {
        name: "google",
        env_prefix: "GOOGLE",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        default_model: "gemini-2.5-pro",
        api_format: ApiFormat::OpenAi,
    },
    ProviderSpec {
        name: "perplexity",
        env_prefix: "PERPLEXITY",
        base_url: "https://api.perplexity.ai/chat/completions",
        default_model: "sonar-pro",
        api_format: ApiFormat::OpenAi,
    },
    ProviderSpec {
        name: "xai",
        env_prefix: "XAI",
        base_url: "https://api.x.ai/v1/chat/completions",
        default_model: "grok-4-1-fast-reasoning",
        api_format: ApiFormat::OpenAi,
    },
    ProviderSpec {
        name: "mistral",
        env_prefix: "MISTRAL",
        base_url: "https://api.mistral.ai/v1/chat/completions",
        default_model: "mistral-large-latest",
        api_format: ApiFormat::OpenAi,
    },
    ProviderSpec {
        name: "openrouter",
        env_prefix: "OPENROUTER",
        base_url: "https://openrouter.ai/api/v1/chat/completions",
        default_model: "moonshotai/kimi-k2.5",
        api_format: ApiFormat::OpenAi,
    },
];

pub fn provider_spec(name: &str) -> Option<&'static ProviderSpec> {
    KNOWN_PROVIDERS.iter().find(|s| s.name == name)
}

/// Resolved settings for one provider. `api_key: None` means unconfigured.
#[derive(Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub api_format: ApiFormat,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_format", &self.api_format)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TOML file layer
// ---------------------------------------------------------------------------

/// Optional on-disk layer. Every field is optional; env vars override it.
/// API keys are deliberately not read from the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub default_provider: Option<String>,
    pub max_retries: Option<u32>,
    pub max_provider_attempts: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub rate_limit_base_ms: Option<u64>,
    pub rate_limit_max_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub sampling: SamplingOptions,
    /// provider name → operation names
    pub routes: HashMap<String, Vec<String>>,
    pub providers: HashMap<String, FileProvider>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileProvider {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        toml::from_str(text)
            .map_err(|e| RelayError::NotConfigured(format!("invalid config file: {e}")))
    }

    pub fn read(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelayError::NotConfigured(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Every known provider, in [`KNOWN_PROVIDERS`] order.
    pub providers: Vec<ProviderSettings>,
    pub default_provider: Option<String>,
    pub sampling: SamplingOptions,
    pub max_retries: u32,
    pub max_provider_attempts: usize,
    pub max_concurrent: usize,
    pub rate_limit: RateLimitConfig,
    pub request_timeout: Duration,
    /// `(provider, operations)` pairs for the operation router.
    pub routes: Vec<(String, Vec<String>)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: KNOWN_PROVIDERS
                .iter()
                .map(|spec| ProviderSettings {
                    name: spec.name.to_string(),
                    api_key: None,
                    model: spec.default_model.to_string(),
                    base_url: spec.base_url.to_string(),
                    api_format: spec.api_format,
                })
                .collect(),
            default_provider: None,
            sampling: SamplingOptions::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_provider_attempts: DEFAULT_MAX_PROVIDER_ATTEMPTS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            rate_limit: RateLimitConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            routes: Vec::new(),
        }
    }
}

impl Config {
    /// Environment, then the TOML file named by `TASKRELAY_CONFIG` (if set), then defaults.
    pub fn load() -> Result<Self, RelayError> {
        let file = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "loading config file");
                FileConfig::read(Path::new(path.trim()))?
            }
            _ => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |k| env::var(k).ok()))
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Resolve from an arbitrary key/value lookup (the process env in production).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_sources(FileConfig::default(), lookup)
    }

    pub fn from_sources<F>(file: FileConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();

        for name in file.providers.keys().chain(file.routes.keys()) {
            if provider_spec(name).is_none() {
                tracing::warn!(provider = %name, "unknown provider in config file, ignoring");
            }
        }

        let providers: Vec<ProviderSettings> = KNOWN_PROVIDERS
            .iter()
            .map(|spec| {
                let file_provider = file.providers.get(spec.name);
                let api_key = get(&format!("{}_API_KEY", spec.env_prefix));
                if api_key.is_none() {
                    tracing::debug!(
                        "{}_API_KEY not set, {} unavailable",
                        spec.env_prefix,
                        spec.name
                    );
                }
                ProviderSettings {
                    name: spec.name.to_string(),
                    api_key,
                    model: get(&format!("{}_MODEL", spec.env_prefix))
                        .or_else(|| file_provider.and_then(|p| p.model.clone()))
                        .unwrap_or_else(|| spec.default_model.to_string()),
                    base_url: get(&format!("{}_BASE_URL", spec.env_prefix))
                        .or_else(|| file_provider.and_then(|p| p.base_url.clone()))
                        .unwrap_or_else(|| spec.base_url.to_string()),
                    api_format: spec.api_format,
                }
            })
            .collect();

        let default_provider = get("TASKRELAY_DEFAULT_PROVIDER")
            .or(file.default_provider)
            .map(|p| p.to_lowercase());
        if let Some(ref name) = default_provider
            && provider_spec(name).is_none()
        {
            tracing::warn!(provider = %name, "default provider is not a known provider");
        }

        let sampling = SamplingOptions {
            temperature: parse_var(&get, "TASKRELAY_TEMPERATURE"),
            max_tokens: parse_var(&get, "TASKRELAY_MAX_TOKENS"),
            top_p: parse_var(&get, "TASKRELAY_TOP_P"),
            presence_penalty: parse_var(&get, "TASKRELAY_PRESENCE_PENALTY"),
            frequency_penalty: parse_var(&get, "TASKRELAY_FREQUENCY_PENALTY"),
        }
        .merged_over(&file.sampling);

        let max_retries = parse_var(&get, "TASKRELAY_MAX_RETRIES")
            .or(file.max_retries)
            .unwrap_or(defaults.max_retries);
        let max_provider_attempts = parse_var(&get, "TASKRELAY_MAX_PROVIDER_ATTEMPTS")
            .or(file.max_provider_attempts)
            .unwrap_or(defaults.max_provider_attempts)
            .max(1);
        let max_concurrent = parse_var(&get, "TASKRELAY_MAX_CONCURRENT")
            .or(file.max_concurrent)
            .unwrap_or(defaults.max_concurrent)
            .max(1);

        let base_ms = parse_var(&get, "TASKRELAY_RATE_LIMIT_BASE_MS")
            .or(file.rate_limit_base_ms)
            .unwrap_or(DEFAULT_BASE_COOLDOWN.as_millis() as u64);
        let max_ms = parse_var(&get, "TASKRELAY_RATE_LIMIT_MAX_MS")
            .or(file.rate_limit_max_ms)
            .unwrap_or(DEFAULT_MAX_COOLDOWN.as_millis() as u64);
        let rate_limit =
            RateLimitConfig::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms));

        let request_timeout = parse_var(&get, "TASKRELAY_REQUEST_TIMEOUT_SECS")
            .or(file.request_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let routes = KNOWN_PROVIDERS
            .iter()
            .filter_map(|spec| {
                let ops = match get(&format!("{}_TASKS", spec.env_prefix)) {
                    Some(list) => split_list(&list),
                    None => file.routes.get(spec.name).cloned().unwrap_or_default(),
                };
                (!ops.is_empty()).then(|| (spec.name.to_string(), ops))
            })
            .collect();

        Config {
            providers,
            default_provider,
            sampling,
            max_retries,
            max_provider_attempts,
            max_concurrent,
            rate_limit,
            request_timeout,
            routes,
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn configured_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.api_key.is_some())
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Parse `key` if present; a malformed value logs a warning and reads as unset.
fn parse_var<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
