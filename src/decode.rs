//! Decoding of one logical line into a stream fragment.

use serde_json::Value;

use crate::extract::Fragment;

/// Result of decoding one line of the streamed body.
#[derive(Debug)]
pub enum DecodedLine {
    /// Blank line; silently skipped, not a failure.
    Blank,
    /// One well-formed JSON fragment.
    Fragment(Fragment),
    /// Line that is not valid JSON. Carries the raw text for the diagnostic;
    /// never fatal to the session.
    Malformed { raw: String },
}

/// Parses one logical line. Strict JSON parsing; any valid JSON value
/// decodes to a fragment (unrecognized shapes simply extract to nothing).
pub fn decode_line(line: &str) -> DecodedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return DecodedLine::Blank;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => DecodedLine::Fragment(Fragment::from_value(value)),
        Err(_) => DecodedLine::Malformed {
            raw: trimmed.to_string(),
        },
    }
}
