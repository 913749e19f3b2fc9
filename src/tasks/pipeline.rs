use crate::dispatch::queue::RequestQueue;
use crate::dispatch::retry::RetryPolicy;
use crate::error::RelayError;
use crate::extract::extract_array;
use crate::orchestrator::Request;
use crate::tasks::prompt::{
    DocumentOptions, document_prompt, strengthened_system_prompt, task_system_prompt,
};
use crate::tasks::{TaskRecord, validate_records};

/// Operation name used to route document parsing.
pub const PARSE_OPERATION: &str = "parse-prd";

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    /// Re-prompt budget and the backoff between attempts.
    pub retry: RetryPolicy,
    /// Append a stricter "JSON only" demand to the system prompt on retries.
    pub strengthen_on_retry: bool,
    pub operation: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            strengthen_on_retry: true,
            operation: PARSE_OPERATION.to_string(),
        }
    }
}

/// Runs (invoke → extract → validate) cycles through the request queue until
/// the output yields valid task records or the retry budget runs out.
///
/// Only extraction and validation failures are re-prompted. A provider error
/// coming back from the queue already means every candidate was exhausted,
/// so it is returned as-is.
#[derive(Clone)]
pub struct TaskExtractor {
    queue: RequestQueue,
    settings: ExtractionSettings,
}

impl TaskExtractor {
    pub fn new(queue: RequestQueue) -> Self {
        Self::with_settings(queue, ExtractionSettings::default())
    }

    pub fn with_settings(queue: RequestQueue, settings: ExtractionSettings) -> Self {
        Self { queue, settings }
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    pub async fn extract_validated(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_retries: u32,
    ) -> Result<Vec<TaskRecord>, RelayError> {
        let policy = RetryPolicy {
            max_retries,
            ..self.settings.retry
        };
        let mut last_cause = String::new();

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    cause = %last_cause,
                    "re-prompting for structured output"
                );
                tokio::time::sleep(delay).await;
            }

            let system = if attempt > 0 && self.settings.strengthen_on_retry {
                Some(strengthened_system_prompt(
                    system_prompt.unwrap_or_default(),
                    &last_cause,
                ))
            } else {
                system_prompt.map(str::to_string)
            };

            let mut request = Request::new(prompt).with_operation(self.settings.operation.as_str());
            if let Some(system) = system {
                request = request.with_system_prompt(system);
            }

            let response = self.queue.send(request).await?;

            let Some(values) = extract_array(&response.text, false) else {
                last_cause = "no JSON array found in response".to_string();
                continue;
            };

            match validate_records(&values) {
                Ok(records) => {
                    tracing::info!(
                        records = records.len(),
                        attempts = attempt + 1,
                        provider = %response.provider,
                        "extracted task records"
                    );
                    return Ok(records);
                }
                Err(issues) => {
                    let shown: Vec<String> =
                        issues.iter().take(3).map(ToString::to_string).collect();
                    last_cause = format!(
                        "{} invalid record(s): {}",
                        issues.len(),
                        shown.join("; ")
                    );
                }
            }
        }

        Err(RelayError::ExtractionFailed {
            attempts: max_retries.saturating_add(1),
            cause: last_cause,
        })
    }

    /// Turn a requirements document into validated task records.
    pub async fn extract_from_document(
        &self,
        document: &str,
        options: &DocumentOptions,
    ) -> Result<Vec<TaskRecord>, RelayError> {
        if document.trim().is_empty() {
            return Err(RelayError::Other("document is empty".to_string()));
        }
        let prompt = document_prompt(document, options);
        let system = task_system_prompt();
        self.extract_validated(&prompt, Some(&system), self.settings.retry.max_retries)
            .await
    }
}
