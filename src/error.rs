use std::time::Duration;

use thiserror::Error;

/// Three-way classification the retry engine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider asked us to slow down. Cool it down and move to the next candidate.
    RateLimited,
    /// Network, timeout or server-side failure. Worth retrying the same provider.
    Transient,
    /// Auth, validation or anything unrecognised. Give up on this provider.
    Fatal,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    NotConfigured(String),

    #[error("no providers available ({} cooling down)", .cooling.len())]
    NoProvidersAvailable { cooling: Vec<String> },

    #[error("all providers failed after {attempts} attempt(s): {last}")]
    AllProvidersFailed {
        attempts: usize,
        last: Box<RelayError>,
    },

    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("could not extract valid records after {attempts} attempt(s): {cause}")]
    ExtractionFailed { attempts: u32, cause: String },

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider, .. } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
            Self::AuthFailed { provider, .. } => Some(provider),
            Self::AllProvidersFailed { last, .. } => last.provider(),
            _ => None,
        }
    }

    /// Classify this error for the retry engine.
    ///
    /// Typed variants decide by shape and HTTP status. Only free-form messages
    /// (`Other`, or `Upstream` without a status) go through [`classify_message`].
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Timeout(_) => ErrorClass::Transient,
            Self::Request(e) => {
                if e.status().is_some_and(|s| s.as_u16() == 429) {
                    ErrorClass::RateLimited
                } else if e.is_builder() {
                    ErrorClass::Fatal
                } else {
                    // connect/timeout/body errors
                    ErrorClass::Transient
                }
            }
            Self::Upstream {
                status: Some(status),
                ..
            } => match status {
                429 => ErrorClass::RateLimited,
                408 => ErrorClass::Transient,
                s if *s >= 500 => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            Self::Upstream {
                status: None,
                message,
                ..
            } => classify_message(message),
            Self::Other(message) => classify_message(message),
            Self::NoProvidersAvailable { .. } => ErrorClass::Transient,
            Self::AllProvidersFailed { last, .. } => last.class(),
            Self::NotConfigured(_)
            | Self::AuthFailed { .. }
            | Self::SchemaParse(_)
            | Self::ExtractionFailed { .. } => ErrorClass::Fatal,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Produce a sanitized error message safe for returning to callers.
    /// Does not leak internal URLs, connection details, or upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured(msg) => format!("configuration error: {msg}"),
            Self::NoProvidersAvailable { cooling } => {
                if cooling.is_empty() {
                    "no providers available".to_string()
                } else {
                    format!(
                        "no providers available, cooling down: {}. Try again shortly",
                        cooling.join(", ")
                    )
                }
            }
            Self::AllProvidersFailed { attempts, last } => {
                format!(
                    "all providers failed after {attempts} attempt(s); last error: {}",
                    last.user_message()
                )
            }
            Self::RateLimited { provider, .. } => {
                format!("rate limited by {provider}, try again shortly")
            }
            Self::Upstream {
                provider, status, ..
            } => match status {
                Some(s) => format!("upstream error from {provider} (HTTP {s})"),
                None => format!("upstream error from {provider}"),
            },
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::AuthFailed { provider, .. } => {
                format!("authentication failed for {provider}")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::ExtractionFailed { attempts, cause } => {
                format!("could not extract valid records after {attempts} attempt(s): {cause}")
            }
            Self::Other(msg) => msg.clone(),
        }
    }
}

/// Substring classifier for errors that arrive as bare messages.
pub fn classify_message(message: &str) -> ErrorClass {
    const RATE_LIMIT: &[&str] = &[
        "rate limit",
        "rate-limit",
        "ratelimit",
        "too many requests",
        "429",
        "quota exceeded",
    ];
    const TRANSIENT: &[&str] = &[
        "timeout",
        "timed out",
        "network",
        "connection",
        "econnreset",
        "econnrefused",
        "socket hang up",
        "server error",
        "overloaded",
        "unavailable",
        "500",
        "502",
        "503",
        "504",
    ];

    let lower = message.to_lowercase();
    if RATE_LIMIT.iter().any(|s| lower.contains(s)) {
        ErrorClass::RateLimited
    } else if TRANSIENT.iter().any(|s| lower.contains(s)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}
