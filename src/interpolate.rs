//! Single-pass `{placeholder}` interpolation
//!
//! - `{key}` is replaced by the string form of `inputs[key]`
//! - unknown keys and malformed braces pass through literally
//! - substituted values are never re-scanned

use std::borrow::Cow;

use serde_json::Value;

use crate::crew::Inputs;

/// Render an input value as plain text (strings unquoted, everything else as JSON)
pub fn value_to_string(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// Interpolate `template` against `inputs`
///
/// Returns `Cow::Borrowed` when nothing was substituted.
pub fn interpolate<'a>(template: &'a str, inputs: &Inputs) -> Cow<'a, str> {
    if !template.contains('{') {
        return Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len());
    let mut replaced = false;
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        // The key runs up to the next '}', and may not contain another '{'
        let key_end = after.find(['{', '}']);
        match key_end {
            Some(end) if after.as_bytes()[end] == b'}' => {
                let key = &after[..end];
                match inputs.get(key) {
                    Some(value) if !key.is_empty() => {
                        out.push_str(&value_to_string(value));
                        replaced = true;
                    }
                    _ => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                // Unclosed or nested brace: emit literally and keep scanning
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    if replaced {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(template)
    }
}
