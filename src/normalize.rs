//! Flattening of heterogeneous `content` values into plain text.
//!
//! Backends disagree on what `content` is: a bare string, an array of parts
//! (strings or `{ "text": ... }` objects), or a single object with a `text`
//! field. This function accepts all of them and anything else becomes `""`.

use serde_json::Value;

/// Converts a `content` value of any shape into a flat string. Total:
/// unrecognized shapes contribute nothing, and array order is preserved.
pub fn normalize_content(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };

    match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => text.as_str(),
                Value::Object(fields) => fields.get("text").and_then(Value::as_str).unwrap_or(""),
                _ => "",
            })
            .collect(),
        Value::Object(fields) => fields
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    }
}
