//! Recover a JSON array of objects from noisy provider text.
//!
//! [`STRATEGIES`] is tried in order, least to most aggressive; the first one
//! that yields an array (or an object, wrapped into a one-element array) wins.

pub mod strategies;

use serde_json::Value;

pub use strategies::{STRATEGIES, Strategy};

/// Run the cascade over `raw`.
///
/// When nothing matches, returns `None` unless `fallback_to_empty` is set.
/// `None` is a hard failure worth re-prompting; `Some(vec![])` means the
/// provider reported nothing to extract.
pub fn extract_array(raw: &str, fallback_to_empty: bool) -> Option<Vec<Value>> {
    let text = raw.trim();
    if !text.is_empty() {
        for (name, strategy) in STRATEGIES {
            if let Some(values) = strategy(text) {
                tracing::debug!(strategy = name, records = values.len(), "extracted array");
                return Some(values);
            }
        }
    }

    tracing::debug!(
        len = raw.len(),
        fallback_to_empty,
        "no extraction strategy recovered structured output"
    );
    fallback_to_empty.then(Vec::new)
}

/// Name of the first strategy that succeeds on `raw`, for diagnostics.
pub fn matching_strategy(raw: &str) -> Option<&'static str> {
    let text = raw.trim();
    STRATEGIES
        .iter()
        .find(|(_, strategy)| strategy(text).is_some())
        .map(|(name, _)| *name)
}
