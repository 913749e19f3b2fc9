//! Task records recovered from provider output, their validation rules, and
//! the prompt → extract → validate retry loop.

pub mod pipeline;
pub mod prompt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MIN_COMPLEXITY: u8 = 1;
pub const MAX_COMPLEXITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One task candidate, as handed to the task-creation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRecord {
    /// Short imperative title, 1-200 characters.
    pub title: String,
    /// What needs to be done, at least 10 characters.
    pub description: String,
    pub priority: Priority,
    /// Estimated effort from 1 (trivial) to 10 (very complex).
    pub complexity: u8,
    /// Titles of tasks this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Implementation notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// How to verify the task is done.
    #[serde(
        default,
        alias = "testStrategy",
        skip_serializing_if = "Option::is_none"
    )]
    pub test_strategy: Option<String>,
}

/// Why one record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Position of the record in the extracted array.
    pub index: usize,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record {}: {}", self.index, self.message)
    }
}

impl TaskRecord {
    /// Check the bounds serde cannot express.
    pub fn check(&self) -> Result<(), String> {
        let title_len = self.title.trim().chars().count();
        if title_len == 0 {
            return Err("title is empty".to_string());
        }
        if title_len > MAX_TITLE_CHARS {
            return Err(format!(
                "title is {title_len} characters (max {MAX_TITLE_CHARS})"
            ));
        }
        let desc_len = self.description.trim().chars().count();
        if desc_len < MIN_DESCRIPTION_CHARS {
            return Err(format!(
                "description is {desc_len} characters (min {MIN_DESCRIPTION_CHARS})"
            ));
        }
        if !(MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&self.complexity) {
            return Err(format!(
                "complexity {} outside {MIN_COMPLEXITY}..={MAX_COMPLEXITY}",
                self.complexity
            ));
        }
        Ok(())
    }
}

/// Validate one extracted value.
pub fn validate_record(value: &Value) -> Result<TaskRecord, String> {
    if !value.is_object() {
        return Err(format!("expected an object, got {}", json_kind(value)));
    }
    let record = TaskRecord::deserialize(value).map_err(|e| e.to_string())?;
    record.check()?;
    Ok(record)
}

/// Validate every extracted value; all-or-nothing.
pub fn validate_records(values: &[Value]) -> Result<Vec<TaskRecord>, Vec<ValidationIssue>> {
    let mut records = Vec::with_capacity(values.len());
    let mut issues = Vec::new();
    for (index, value) in values.iter().enumerate() {
        match validate_record(value) {
            Ok(record) => records.push(record),
            Err(message) => issues.push(ValidationIssue { index, message }),
        }
    }
    if issues.is_empty() {
        Ok(records)
    } else {
        Err(issues)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn valid() -> Value {
        json!({
            "title": "Add login",
            "description": "Implement OAuth login flow",
            "priority": "high",
            "complexity": 5,
        })
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let record = validate_record(&valid()).unwrap();
        assert_eq!(record.priority, Priority::High);
        assert!(record.dependencies.is_empty());
        assert!(record.tags.is_empty());
        assert_eq!(record.details, None);
    }

    #[test]
    fn camel_case_test_strategy_is_accepted() {
        let mut v = valid();
        v["testStrategy"] = json!("Log in with a test account");
        let record = validate_record(&v).unwrap();
        assert_eq!(
            record.test_strategy.as_deref(),
            Some("Log in with a test account")
        );
    }

    #[test]
    fn bounds_are_enforced() {
        let cases = [
            ("title", json!("   ")),
            ("title", json!("x".repeat(MAX_TITLE_CHARS + 1))),
            ("description", json!("too short")),
            ("priority", json!("urgent")),
            ("complexity", json!(0)),
            ("complexity", json!(11)),
            ("complexity", json!(4.5)),
            ("dependencies", json!("task-1")),
            ("tags", json!([1, 2])),
        ];
        for (field, bad) in cases {
            let mut v = valid();
            v[field] = bad.clone();
            assert!(
                validate_record(&v).is_err(),
                "{field} = {bad} should be rejected"
            );
        }
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("priority");
        let err = validate_record(&v).unwrap_err();
        assert!(err.contains("priority"), "{err}");
    }

    #[test]
    fn issues_point_at_bad_records() {
        let values = vec![valid(), json!("just text"), valid()];
        let issues = validate_records(&values).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].index, 1);
        assert!(issues[0].to_string().starts_with("record 1:"));
    }
}
