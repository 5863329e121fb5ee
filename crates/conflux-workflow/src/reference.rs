//! Output references between components.
//!
//! An input string of the form `{Name.key}` refers to output `key` of the
//! component called `Name`. A string that is exactly one reference resolves
//! to the stored value itself; references embedded in longer text are
//! rendered into it. Absent outputs resolve to null, or to empty text when
//! embedded.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::value::Value;

static EXACT_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{([^{}\s.]+\.[^{}\s]+)\}$").expect("exact reference regex should be valid")
});

static EMBEDDED_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([^{}\s.]+\.[^{}\s]+)\}").expect("embedded reference regex should be valid")
});

/// Returns `true` if `name` can appear as the component part of a reference.
pub fn is_addressable(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '.'))
}

/// Formats a reference to `key` of `component`.
pub fn reference(component: &str, key: &str) -> String {
    format!("{{{}.{}}}", component, key)
}

/// Returns `true` if `text` is exactly one reference.
pub fn is_reference(text: &str) -> bool {
    EXACT_REFERENCE.is_match(text)
}

/// Collects the component names referenced anywhere inside `value`.
pub fn referenced_components(value: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_components(value, &mut names);
    names
}

fn collect_components(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for captures in EMBEDDED_REFERENCE.captures_iter(text) {
                if let Some((component, _)) = captures[1].split_once('.') {
                    names.push(component.to_string());
                }
            }
        }
        Value::List(items) => items.iter().for_each(|item| collect_components(item, names)),
        Value::Map(map) => map.values().for_each(|item| collect_components(item, names)),
        _ => {}
    }
}

/// Resolves every reference inside `value` against `outputs`.
///
/// Lists and maps are resolved element by element; other values pass
/// through untouched.
pub fn resolve(value: &Value, outputs: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(text) => resolve_text(text, outputs),
        Value::List(items) => Value::List(items.iter().map(|item| resolve(item, outputs)).collect()),
        Value::Map(map) => {
            Value::Map(map.iter().map(|(k, v)| (k.clone(), resolve(v, outputs))).collect())
        }
        other => other.clone(),
    }
}

fn resolve_text(text: &str, outputs: &HashMap<String, Value>) -> Value {
    if let Some(captures) = EXACT_REFERENCE.captures(text) {
        return outputs.get(&captures[1]).cloned().unwrap_or(Value::Null);
    }

    if !EMBEDDED_REFERENCE.is_match(text) {
        return Value::String(text.to_string());
    }

    let rendered = EMBEDDED_REFERENCE.replace_all(text, |captures: &regex::Captures<'_>| {
        outputs.get(&captures[1]).map(ToString::to_string).unwrap_or_default()
    });
    Value::String(rendered.into_owned())
}
