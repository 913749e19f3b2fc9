//! Recovering task records from the kinds of text providers actually return.

use proptest::prelude::*;
use serde_json::{Value, json};

use taskrelay::extract::{extract_array, matching_strategy};
use taskrelay::tasks::{Priority, TaskRecord, validate_records};

#[test]
fn fenced_response_with_prose_yields_validated_record() {
    let raw = "Here is the result:\n```json\n[{\"title\":\"Add login\",\"description\":\"Implement OAuth login flow\",\"priority\":\"high\",\"complexity\":5,\"dependencies\":[],\"tags\":[\"auth\"]}]\n```";

    let values = extract_array(raw, false).unwrap();
    assert_eq!(values.len(), 1);

    let records = validate_records(&values).unwrap();
    assert_eq!(records[0].title, "Add login");
    assert_eq!(records[0].priority, Priority::High);
    assert_eq!(records[0].complexity, 5);
    assert_eq!(records[0].tags, vec!["auth"]);
    assert!(records[0].dependencies.is_empty());
}

#[test]
fn unrecoverable_text_is_none_unless_falling_back() {
    assert_eq!(extract_array("not json", false), None);
    assert_eq!(extract_array("not json", true), Some(vec![]));
}

#[test]
fn single_object_reply_becomes_one_element_array() {
    let raw = "I found one task: {\"title\": \"Set up CI\", \"description\": \"Add a build workflow\", \"priority\": \"medium\", \"complexity\": 3}";
    let values = extract_array(raw, false).unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["title"], "Set up CI");
}

#[test]
fn banner_wrapped_output_is_recovered() {
    let raw = "[START]\n[{\"title\": \"a\"}]\n[END]";
    let values = extract_array(raw, false).unwrap();
    assert_eq!(values, vec![json!({"title": "a"})]);
}

#[test]
fn js_style_output_is_repaired() {
    let raw = "Tasks:\n[\n  {title: 'Write docs', complexity: 2,},\n]\n";
    let values = extract_array(raw, false).unwrap();
    assert_eq!(values, vec![json!({"title": "Write docs", "complexity": 2})]);
    assert_eq!(matching_strategy(raw), Some("normalized"));
}

#[test]
fn broken_array_salvages_complete_objects() {
    // Truncated mid-stream: the array never closes and the last object is cut off.
    let raw = "[{\"title\": \"One\"}, {\"title\": \"Two\"}, {\"title\": \"Thr";
    let values = extract_array(raw, false).unwrap();
    assert_eq!(values, vec![json!({"title": "One"}), json!({"title": "Two"})]);
    assert_eq!(matching_strategy(raw), Some("object_fragments"));
}

// ---------------------------------------------------------------------------
// Wrapped records survive extraction and validation unchanged
// ---------------------------------------------------------------------------

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

fn record() -> impl Strategy<Value = TaskRecord> {
    (
        "[A-Za-z][A-Za-z0-9 ]{0,40}",
        "[a-z]{10,60}",
        priority(),
        1u8..=10,
        proptest::collection::vec("[a-z]{1,8}", 0..3),
    )
        .prop_map(|(title, description, priority, complexity, tags)| TaskRecord {
            title,
            description,
            priority,
            complexity,
            dependencies: Vec::new(),
            tags,
            details: None,
            test_strategy: None,
        })
}

fn wrap(json: &str, style: u8) -> String {
    match style {
        0 => json.to_string(),
        1 => format!("Here are the tasks you asked for:\n{json}\nLet me know if anything is missing."),
        2 => format!("```json\n{json}\n```"),
        3 => format!("Sure.\n\n```\n{json}\n```\n\nDone."),
        _ => format!("=== BEGIN JSON ===\n{json}\n=== END JSON ==="),
    }
}

proptest! {
    #[test]
    fn wrapped_records_round_trip(
        records in proptest::collection::vec(record(), 0..5),
        style in 0u8..5,
        pretty in any::<bool>(),
    ) {
        let json = if pretty {
            serde_json::to_string_pretty(&records).unwrap()
        } else {
            serde_json::to_string(&records).unwrap()
        };
        let raw = wrap(&json, style);

        let values: Vec<Value> = extract_array(&raw, false).expect("array recovered");
        let validated = validate_records(&values).expect("records valid");
        prop_assert_eq!(validated, records);
    }
}
