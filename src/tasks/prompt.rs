use schemars::schema_for;

use crate::tasks::TaskRecord;

/// Options for turning a requirements document into tasks.
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Approximate number of tasks to ask for. `None` lets the model decide.
    pub num_tasks: Option<usize>,
}

/// JSON Schema for one [`TaskRecord`], pretty-printed.
pub fn record_schema() -> String {
    let schema = schema_for!(TaskRecord);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn task_system_prompt() -> String {
    format!(
        "You are a senior engineer breaking a requirements document into an ordered \
         list of development tasks.\n\n\
         Respond with a JSON array. Each element must match this JSON Schema:\n\
         {schema}\n\n\
         Rules:\n\
         - priority is one of \"low\", \"medium\", \"high\", \"critical\"\n\
         - complexity is an integer from 1 to 10\n\
         - dependencies lists titles of earlier tasks in the same array\n\
         - order tasks so dependencies come first",
        schema = record_schema()
    )
}

/// System prompt used after a response could not be parsed or validated.
pub fn strengthened_system_prompt(base: &str, failure: &str) -> String {
    let demand = format!(
        "IMPORTANT: your previous response was rejected ({failure}). \
         Respond with ONLY the JSON array. Do not include explanations, markdown, \
         code fences, or any text before or after the array."
    );
    if base.trim().is_empty() {
        demand
    } else {
        format!("{base}\n\n{demand}")
    }
}

pub fn document_prompt(document: &str, options: &DocumentOptions) -> String {
    let count = match options.num_tasks {
        Some(n) => format!("approximately {n} tasks"),
        None => "an appropriate number of tasks".to_string(),
    };
    format!(
        "Break the following requirements document into {count}.\n\n\
         <document>\n{document}\n</document>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_required_fields() {
        let schema = record_schema();
        for field in ["title", "description", "priority", "complexity"] {
            assert!(schema.contains(field), "schema missing {field}");
        }
    }

    #[test]
    fn document_prompt_carries_task_count() {
        let p = document_prompt(
            "Build a todo app",
            &DocumentOptions { num_tasks: Some(7) },
        );
        assert!(p.contains("approximately 7 tasks"));
        assert!(p.contains("Build a todo app"));
    }

    #[test]
    fn strengthened_prompt_keeps_base() {
        let p = strengthened_system_prompt("BASE", "no JSON array found");
        assert!(p.starts_with("BASE"));
        assert!(p.contains("no JSON array found"));
        assert!(p.contains("ONLY the JSON array"));
    }
}
