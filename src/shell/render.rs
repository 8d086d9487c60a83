//! Human-readable rendering of evaluation results for interactive sessions.

use serde_json::Value;

use crate::eval::EvalError;

const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const GREY: &str = "\x1b[90m";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const RESET_FG: &str = "\x1b[39m";
const RESET_BOLD: &str = "\x1b[22m";

/// Render a result the way a shell prints it: strings quoted, objects as
/// `{ key: value }`, `undefined` for no value.
#[must_use]
pub fn render_value(value: Option<&Value>, colors: bool) -> String {
    let mut out = String::new();
    write_value(&mut out, value, colors);
    out
}

/// Render an uncaught evaluation error.
#[must_use]
pub fn render_error(err: &EvalError, colors: bool) -> String {
    let text = format!("Uncaught {err}");
    if colors {
        format!("{RED}{text}{RESET_FG}")
    } else {
        text
    }
}

fn write_value(out: &mut String, value: Option<&Value>, colors: bool) {
    match value {
        None => paint(out, "undefined", GREY, RESET_FG, colors),
        Some(Value::Null) => paint(out, "null", BOLD, RESET_BOLD, colors),
        Some(Value::Bool(b)) => paint(out, &b.to_string(), YELLOW, RESET_FG, colors),
        Some(Value::Number(n)) => paint(out, &n.to_string(), YELLOW, RESET_FG, colors),
        Some(Value::String(s)) => paint(out, &quote(s), GREEN, RESET_FG, colors),
        Some(Value::Array(items)) if items.is_empty() => out.push_str("[]"),
        Some(Value::Array(items)) => {
            out.push_str("[ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, Some(item), colors);
            }
            out.push_str(" ]");
        }
        Some(Value::Object(map)) if map.is_empty() => out.push_str("{}"),
        Some(Value::Object(map)) => {
            out.push_str("{ ");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if is_identifier(key) {
                    out.push_str(key);
                } else {
                    out.push_str(&quote(key));
                }
                out.push_str(": ");
                write_value(out, Some(item), colors);
            }
            out.push_str(" }");
        }
    }
}

fn paint(out: &mut String, text: &str, start: &str, end: &str, colors: bool) {
    if colors {
        out.push_str(start);
        out.push_str(text);
        out.push_str(end);
    } else {
        out.push_str(text);
    }
}

fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
