use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// A pure recovery step: text in, array out (or `None` to pass to the next step).
pub type Strategy = fn(&str) -> Option<Vec<Value>>;

/// Ordered cascade, least to most aggressive.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("direct", direct),
    ("code_fence", code_fence),
    ("array_of_objects", array_of_objects),
    ("bracket_span", bracket_span),
    ("object_span", object_span),
    ("sentinel_banners", sentinel_banners),
    ("normalized", normalized),
    ("object_fragments", object_fragments),
];

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

static FENCE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").expect("valid regex"));

static ARRAY_OF_OBJECTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[\s*\{.*\}\s*\]").expect("valid regex"));

static OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Whole-line banners such as `=== START ===`, `--- END OF JSON ---`, `BEGIN OUTPUT`.
static BANNER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*[-=#*<>\[\]]*[ \t]*(BEGIN|START|END)(?:[ \t_]+(?:OF[ \t_]+)?(?:JSON|OUTPUT|RESULT|RESPONSE|TASKS|DATA))?[ \t]*[-=#*<>\[\]]*[ \t]*$",
    )
    .expect("valid regex")
});

/// Inline sentinel tags such as `<json>`, `</output>`, `[START]`, `[/END]`.
static SENTINEL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:json|output|result|response|tasks)>|\[/?(?:START|END)\]")
        .expect("valid regex")
});

/// Objects with at most one level of nested braces.
static OBJECT_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Arrays pass through, objects are wrapped, anything else is rejected.
fn into_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        obj @ Value::Object(_) => Some(vec![obj]),
        _ => None,
    }
}

fn parse(text: &str) -> Option<Vec<Value>> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .and_then(into_array)
}

/// Slice between the first `open` and the last `close`, inclusive.
fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Whole text, then first-`[`-to-last-`]`, then first-`{`-to-last-`}`.
fn parse_loose(text: &str) -> Option<Vec<Value>> {
    parse(text)
        .or_else(|| span(text, '[', ']').and_then(parse))
        .or_else(|| span(text, '{', '}').and_then(parse))
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// 1. The text is already JSON.
pub fn direct(text: &str) -> Option<Vec<Value>> {
    parse(text)
}

/// 2. JSON inside markdown code fences: fenced block contents first, then
///    the whole text with fence markers removed.
pub fn code_fence(text: &str) -> Option<Vec<Value>> {
    if !text.contains("```") {
        return None;
    }
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| parse(m.as_str()))
        .or_else(|| parse(&FENCE_MARKER.replace_all(text, "")))
}

/// 3. First `[ { … } ]`-shaped span.
pub fn array_of_objects(text: &str) -> Option<Vec<Value>> {
    ARRAY_OF_OBJECTS.find(text).and_then(|m| parse(m.as_str()))
}

/// 4. Everything between the first `[` and the last `]`.
pub fn bracket_span(text: &str) -> Option<Vec<Value>> {
    span(text, '[', ']').and_then(parse)
}

/// 5. First `{ … }`-shaped span, wrapped in an array.
pub fn object_span(text: &str) -> Option<Vec<Value>> {
    let m = OBJECT.find(text)?;
    match serde_json::from_str::<Value>(m.as_str()).ok()? {
        obj @ Value::Object(_) => Some(vec![obj]),
        _ => None,
    }
}

/// 6. Drop START/END banners and sentinel tags some providers wrap payloads in.
pub fn sentinel_banners(text: &str) -> Option<Vec<Value>> {
    let without_lines = BANNER_LINE.replace_all(text, "");
    let cleaned = SENTINEL_TAG.replace_all(&without_lines, "");
    if cleaned.len() == text.len() {
        return None;
    }
    parse_loose(&cleaned)
}

/// 7. Repair common JSON-ish mistakes one at a time,
///    re-parsing after every repair that changed something.
pub fn normalized(text: &str) -> Option<Vec<Value>> {
    let mut current = text.to_string();
    for repair in REPAIRS {
        let next = repair(&current);
        if next != current {
            if let Some(values) = parse_loose(&next) {
                return Some(values);
            }
            current = next;
        }
    }
    None
}

/// 8. Last resort: strip unsafe characters and collect every standalone
///    `{…}` fragment that parses on its own.
pub fn object_fragments(text: &str) -> Option<Vec<Value>> {
    let safe = strip_unsafe_chars(text);
    let objects: Vec<Value> = OBJECT_FRAGMENT
        .find_iter(&safe)
        .filter_map(|m| {
            serde_json::from_str::<Value>(m.as_str())
                .ok()
                .or_else(|| serde_json::from_str::<Value>(&normalize(m.as_str())).ok())
        })
        .filter(Value::is_object)
        .collect();
    (!objects.is_empty()).then_some(objects)
}

// ---------------------------------------------------------------------------
// Repairs
// ---------------------------------------------------------------------------

/// Cumulative, cheapest first. None of them touch the inside of a string
/// literal except `collapse_newlines`.
const REPAIRS: &[fn(&str) -> String] = &[
    collapse_newlines,
    strip_trailing_commas,
    quote_bare_keys,
    single_to_double_quotes,
];

/// Every repair applied in order.
pub(crate) fn normalize(text: &str) -> String {
    REPAIRS
        .iter()
        .fold(text.to_string(), |acc, repair| repair(&acc))
}

fn is_structural(c: char) -> bool {
    matches!(c, ':' | ',' | '[' | ']' | '{' | '}')
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars
        .get(from..)?
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

fn prev_significant(chars: &[char], before: usize) -> Option<char> {
    chars[..before]
        .iter()
        .rev()
        .copied()
        .find(|c| !c.is_whitespace())
}

/// String-literal tracker. Double-quoted strings follow JSON escaping.
/// A single quote only opens a literal after a structural character and only
/// closes one before a structural character, so apostrophes in prose and in
/// values (`'the user's token'`) stay text.
#[derive(Debug, Default)]
struct Literal {
    quote: Option<char>,
    escaped: bool,
}

impl Literal {
    /// Advance over `chars[i]`. True when that char is part of a literal,
    /// delimiting quotes included.
    fn step(&mut self, chars: &[char], i: usize) -> bool {
        let c = chars[i];
        let Some(quote) = self.quote else {
            let opens = c == '"'
                || (c == '\'' && prev_significant(chars, i).is_none_or(is_structural));
            if opens {
                self.quote = Some(c);
            }
            return opens;
        };
        if self.escaped {
            self.escaped = false;
        } else if c == '\\' {
            self.escaped = true;
        } else if c == quote
            && (quote == '"' || next_significant(chars, i + 1).is_none_or(is_structural))
        {
            self.quote = None;
        }
        true
    }
}

fn collapse_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// `[1, 2,]` → `[1, 2]`, `{"a": 1,}` → `{"a": 1}`.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut literal = Literal::default();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let in_literal = literal.step(&chars, i);
        if !in_literal && c == ',' && matches!(next_significant(&chars, i + 1), Some(']' | '}')) {
            continue;
        }
        out.push(c);
    }
    out
}

/// `{title: "x"}` → `{"title": "x"}`.
fn quote_bare_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut literal = Literal::default();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let starts_key = !literal.step(&chars, i)
            && (c.is_ascii_alphabetic() || c == '_')
            && matches!(prev_significant(&chars, i), Some('{' | ','));
        if !starts_key {
            out.push(c);
            i += 1;
            continue;
        }

        let end = chars[i..]
            .iter()
            .position(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(chars.len(), |n| i + n);
        let word: String = chars[i..end].iter().collect();
        if next_significant(&chars, end) == Some(':') {
            out.push('"');
            out.push_str(&word);
            out.push('"');
        } else {
            out.push_str(&word);
        }
        i = end;
    }
    out
}

/// `{'a': 'it\'s'}` → `{"a": "it's"}`.
fn single_to_double_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut literal = Literal::default();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let before = literal.quote;
        if before == Some('\'') && c == '\\' && chars.get(i + 1) == Some(&'\'') {
            out.push('\'');
            i += 2;
            continue;
        }
        let was_escaped = literal.escaped;
        literal.step(&chars, i);
        match (before, literal.quote) {
            (None, Some('\'')) | (Some('\''), None) => out.push('"'),
            (Some('\''), Some(_)) if c == '"' && !was_escaped => out.push_str("\\\""),
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

fn strip_unsafe_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{2028}' | '\u{2029}')
                && (!c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn direct_rejects_scalars() {
        assert_eq!(direct("42"), None);
        assert_eq!(direct("null"), None);
        assert_eq!(direct(r#"[{"a":1}]"#), Some(vec![json!({"a": 1})]));
    }

    #[test]
    fn code_fence_prefers_block_contents() {
        let text = "Here you go:\n```json\n[{\"a\": 1}]\n```\nAnything else?";
        assert_eq!(code_fence(text), Some(vec![json!({"a": 1})]));
        assert_eq!(code_fence("[1]"), None);
    }

    #[test]
    fn array_of_objects_keeps_nested_arrays() {
        let text = r#"Tasks: [{"deps": [], "tags": ["x"]}, {"deps": ["a"]}] end"#;
        let got = array_of_objects(text).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1]["deps"], json!(["a"]));
    }

    #[test]
    fn object_span_only_accepts_objects() {
        assert_eq!(object_span(r#"x {"a": 1} y"#), Some(vec![json!({"a": 1})]));
        assert_eq!(object_span("{ not json }"), None);
    }

    #[test]
    fn banners_and_tags_are_removed() {
        // The bracketed banners defeat the span strategies.
        let text = "[START]\n[\"a\", \"b\"]\n[END]";
        assert_eq!(bracket_span(text), None);
        assert_eq!(sentinel_banners(text), Some(vec![json!("a"), json!("b")]));

        assert_eq!(
            sentinel_banners("=== BEGIN JSON ===\n{\"a\": 1}\n=== END OF JSON ==="),
            Some(vec![json!({"a": 1})])
        );
        assert_eq!(
            sentinel_banners("<json>{\"a\": 1}</json>"),
            Some(vec![json!({"a": 1})])
        );
        assert_eq!(sentinel_banners("nothing to strip"), None);
    }

    #[test]
    fn normalize_repairs_js_style_objects() {
        let text = "[{title: 'Add login', tags: ['auth',],},\n{title: 'Logout'}]";
        let got = normalized(text).unwrap();
        assert_eq!(got[0]["title"], "Add login");
        assert_eq!(got[0]["tags"], json!(["auth"]));
        assert_eq!(got[1]["title"], "Logout");
    }

    #[test]
    fn trailing_commas_survive_apostrophes_in_values() {
        let text = r#"[{"title":"Add login","description":"Store the user's session token","priority":"high","complexity":5,},]"#;
        let got = normalized(text).unwrap();
        assert_eq!(got[0]["description"], "Store the user's session token");
        assert_eq!(got[0]["complexity"], 5);
    }

    #[test]
    fn key_like_phrases_inside_values_are_left_alone() {
        let text = r#"[{"title":"Add login","description":"Implement OAuth, scope: email only","priority":"high","complexity":5,}]"#;
        let got = normalized(text).unwrap();
        assert_eq!(got[0]["description"], "Implement OAuth, scope: email only");

        let js = "{title: 'Fix the user's login', note: 'OAuth, scope: email',}";
        let got = normalized(js).unwrap();
        assert_eq!(got[0]["title"], "Fix the user's login");
        assert_eq!(got[0]["note"], "OAuth, scope: email");
    }

    #[test]
    fn single_quoted_values_escape_inner_double_quotes() {
        assert_eq!(
            single_to_double_quotes(r#"{'a': 'say "hi"', 'b': 'it\'s'}"#),
            r#"{"a": "say \"hi\"", "b": "it's"}"#
        );
    }

    #[test]
    fn repairs_stop_at_the_first_one_that_parses() {
        // Trailing commas alone fix this; the prose apostrophe is never rewritten.
        let text = "Here's the list: [1, 2,]";
        assert_eq!(normalized(text), Some(vec![json!(1), json!(2)]));
        assert_eq!(normalized("nothing to repair"), None);
    }

    #[test]
    fn fragments_salvage_what_parses() {
        let text = "junk {\"a\": 1} more junk {broken {\"b\": {\"c\": 2}}\u{0007}";
        let got = object_fragments(text).unwrap();
        assert_eq!(got, vec![json!({"a": 1}), json!({"b": {"c": 2}})]);
        assert_eq!(object_fragments("no braces here"), None);
    }

    #[test]
    fn strip_unsafe_keeps_unicode_text() {
        assert_eq!(strip_unsafe_chars("caf\u{e9}\u{200B}\u{0000}\n"), "caf\u{e9}\n");
    }
}
