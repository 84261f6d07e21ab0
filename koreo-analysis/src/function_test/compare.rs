use std::fmt;

use serde_json::Value;

use crate::expression::eval::{type_name, values_equal};

/// One difference between an expected and an actual value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Dotted path of the differing field, e.g. `spec.ports[0].name`.
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    pub fn new(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "expected {}, got {}", self.expected, self.actual)
        } else {
            write!(
                f,
                "`{}` expected {}, got {}",
                self.field, self.expected, self.actual
            )
        }
    }
}

fn join(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("{} items", items.len()),
        Value::Object(_) => "a map".to_string(),
        other => other.to_string(),
    }
}

/// Structural comparison; numbers compare by value (`15 == 15.0`).
pub fn compare(expected: &Value, actual: &Value) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    compare_at("", expected, actual, &mut mismatches);
    mismatches
}

fn compare_at(path: &str, expected: &Value, actual: &Value, found: &mut Vec<Mismatch>) {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            for (key, value) in actual {
                if !expected.contains_key(key) {
                    found.push(Mismatch::new(join(path, key), "missing", describe(value)));
                }
            }
            for (key, value) in expected {
                match actual.get(key) {
                    Some(existing) => compare_at(&join(path, key), value, existing, found),
                    None => found.push(Mismatch::new(join(path, key), describe(value), "missing")),
                }
            }
        }
        (Value::Array(expected), Value::Array(actual)) => {
            if expected.len() != actual.len() {
                found.push(Mismatch::new(
                    path,
                    describe(&Value::Array(expected.clone())),
                    describe(&Value::Array(actual.clone())),
                ));
                return;
            }
            for (idx, (expected, actual)) in expected.iter().zip(actual).enumerate() {
                compare_at(&format!("{path}[{idx}]"), expected, actual, found);
            }
        }
        (Value::Number(_), Value::Number(_)) if values_equal(expected, actual) => {}
        _ if type_name(expected) != type_name(actual)
            && !(expected.is_number() && actual.is_number()) =>
        {
            found.push(Mismatch::new(
                path,
                format!("a {}", type_name(expected)),
                format!("a {}", type_name(actual)),
            ));
        }
        _ if expected != actual => {
            found.push(Mismatch::new(path, describe(expected), describe(actual)));
        }
        _ => {}
    }
}
