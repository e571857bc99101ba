// src/llm/parse.rs
//
// Pulling structured data out of free-form model text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("static pattern"))
}

fn fenced_any() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(json|python)\s*(.*?)```").expect("static pattern"))
}

/// Top-level `{...}` spans, honouring nesting and string literals.
fn brace_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_str = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_str {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_str = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    spans
}

fn as_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(m)) => Some(m),
        _ => None,
    }
}

/// The last JSON object in `text`. Empty objects count as nothing.
pub fn last_json_object(text: &str) -> Option<Map<String, Value>> {
    let fenced_hit = fenced_json()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| as_object(m.as_str()))
        .last();

    fenced_hit
        .or_else(|| brace_spans(text).into_iter().rev().find_map(as_object))
        .filter(|m| !m.is_empty())
}

/// Every ```json block that holds an object, in order, each paired with the
/// ```python block that immediately follows it in the text.
///
/// A block that is not an object is skipped together with its code, so one
/// bad block never shifts code onto the next object.
pub fn json_with_code(text: &str) -> Vec<(Map<String, Value>, Option<String>)> {
    let blocks: Vec<(&str, &str)> = fenced_any()
        .captures_iter(text)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    blocks
        .iter()
        .enumerate()
        .filter(|(_, (lang, _))| *lang == "json")
        .filter_map(|(i, (_, body))| {
            let obj = as_object(body)?;
            let code = blocks
                .get(i + 1)
                .filter(|(lang, _)| *lang == "python")
                .map(|(_, code)| code.trim().to_string());
            Some((obj, code))
        })
        .collect()
}

/// String field of a parsed object.
pub fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}
