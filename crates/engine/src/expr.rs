// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression evaluation over message data.
//!
//! Dotted paths address nested structures (`customer.address.city`).
//! Comparisons coerce both sides to numbers when both are numeric literals;
//! otherwise they compare lexically. Regular expressions follow the `^…$`
//! anchoring convention: patterns are matched as written, anchored only when
//! the author anchors them.

use hermod_core::CompareOp;
use serde_json::{Map, Value};
use thiserror::Error;

/// Evaluation failures; classified as data errors by the engine.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("invalid regex {pattern:?}: {reason}")]
    Regex { pattern: String, reason: String },
    #[error("operator {op:?} needs a string pattern, got {got}")]
    PatternType { op: &'static str, got: &'static str },
}

/// Read the value at a dotted path.
pub fn get_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = data.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a value at a dotted path, creating missing intermediates.
///
/// Intermediate values that are not objects are replaced by objects.
pub fn set_path(data: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };
    let mut current = data;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot.as_object_mut() {
            Some(next) => current = next,
            // Just replaced with an object above.
            None => unreachable!("path intermediate is not an object"),
        }
    }
    current.insert(last.to_string(), value);
}

/// Numeric view of a value: numbers, or strings that parse as numbers.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Lexical view of a value, without JSON quoting for strings.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (numeric(left), numeric(right)) {
        return l == r;
    }
    match (left, right) {
        (Value::String(_), _) | (_, Value::String(_)) => stringify(left) == stringify(right),
        _ => left == right,
    }
}

/// Evaluate `left op right`.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::Ne => Ok(!values_equal(left, right)),
        CompareOp::Gt => Ok(ordered(left, right, |o| o == std::cmp::Ordering::Greater)),
        CompareOp::Lt => Ok(ordered(left, right, |o| o == std::cmp::Ordering::Less)),
        CompareOp::Contains => Ok(contains(left, right)),
        CompareOp::Regex => regex_match(left, right),
        CompareOp::In => Ok(is_in(left, right)),
    }
}

fn ordered(left: &Value, right: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Some(l), Some(r)) = (numeric(left), numeric(right)) {
        return l.partial_cmp(&r).is_some_and(&check);
    }
    check(stringify(left).cmp(&stringify(right)))
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
        _ => stringify(left).contains(&stringify(right)),
    }
}

fn regex_match(left: &Value, right: &Value) -> Result<bool, ExprError> {
    let pattern = match right {
        Value::String(s) => s.as_str(),
        other => {
            return Err(ExprError::PatternType { op: "regex", got: value_type(other) });
        }
    };
    let re = regex::Regex::new(pattern).map_err(|err| ExprError::Regex {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })?;
    Ok(re.is_match(&stringify(left)))
}

fn is_in(left: &Value, right: &Value) -> bool {
    match right {
        Value::Array(items) => items.iter().any(|item| values_equal(left, item)),
        // A scalar right-hand side degenerates to equality.
        other => values_equal(left, other),
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a mapping expression against message data.
///
/// An expression that is exactly `{path}` yields the value at that path with
/// its type preserved (missing paths yield null). Any other expression is
/// treated as a string template: `{path}` placeholders are replaced with
/// stringified values, missing paths with the empty string.
pub fn render(expression: &str, data: &Map<String, Value>) -> Value {
    let trimmed = expression.trim();
    if trimmed.len() > 2 && trimmed.starts_with('{') && trimmed.ends_with('}') {
        let inner = &trimmed[1..trimmed.len() - 1];
        if !inner.contains(['{', '}']) {
            return get_path(data, inner).cloned().unwrap_or(Value::Null);
        }
    }

    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                let path = &rest[start + 1..start + end];
                if let Some(value) = get_path(data, path) {
                    out.push_str(&stringify(value));
                }
                rest = &rest[start + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

#[cfg(test)]
#[path = "expr_tests.rs"]
mod tests;
