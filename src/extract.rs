//! Semantic extraction from one decoded stream fragment.
//!
//! The backends behind `/v1/chat/completions` do not agree on a wire shape:
//! Ollama-style servers emit `{ "message": { ... } }` chunks, OpenAI-style
//! servers emit `{ "choices": [{ "delta": { ... } }] }` or
//! `{ "choices": [{ "message": { ... } }] }`, and some proxies flatten the
//! fields onto the fragment itself. Rather than picking one schema, every
//! recognized location is checked in a fixed order and the contributions are
//! concatenated. A backend that populates several locations redundantly will
//! be counted more than once; that tolerance is deliberate.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

use crate::normalize::normalize_content;

/// Deserializes a field but falls back to the default when its value has an
/// unexpected shape, instead of failing the whole fragment.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Token accounting optionally reported by the backend, either at the top
/// level of a fragment or per choice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct UsageStats {
    pub total_tokens: Option<u32>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// The `message`/`delta` payload shared by all recognized chunk shapes.
/// Content and thinking values stay untyped here; [`normalize_content`]
/// flattens them.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ChunkBody {
    pub content: Option<Value>,
    pub thinking: Option<Value>,
    pub thought: Option<Value>,
    pub reasoning: Option<Value>,
}

/// One entry of an OpenAI-style `choices` array.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Choice {
    #[serde(deserialize_with = "lenient")]
    pub delta: Option<ChunkBody>,
    #[serde(deserialize_with = "lenient")]
    pub message: Option<ChunkBody>,
    #[serde(deserialize_with = "lenient")]
    pub usage: Option<UsageStats>,
}

/// One decoded JSON value from one line of the streamed body.
///
/// All fields are optional: a fragment matching none of the recognized
/// locations extracts to an empty [`StreamEvent`]. The flattened top-level
/// content/thinking fields cover backends that emit flat chunks.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Fragment {
    #[serde(deserialize_with = "lenient")]
    pub message: Option<ChunkBody>,
    #[serde(deserialize_with = "lenient")]
    pub choices: Vec<Choice>,
    pub content: Option<Value>,
    pub thinking: Option<Value>,
    pub thought: Option<Value>,
    pub reasoning: Option<Value>,
    #[serde(deserialize_with = "lenient")]
    pub usage: Option<UsageStats>,
}

impl Fragment {
    /// Builds a fragment from an already-parsed JSON value. Values that are
    /// not objects (or whose fields have unexpected shapes) produce a
    /// fragment with nothing to extract; this never fails.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// The normalized result of processing one fragment. Several signals may
/// coexist in one event; all default to empty/absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamEvent {
    pub thinking_delta: String,
    pub answer_delta: String,
    pub usage: Option<UsageStats>,
}

impl StreamEvent {
    pub fn is_empty(&self) -> bool {
        self.thinking_delta.is_empty() && self.answer_delta.is_empty() && self.usage.is_none()
    }
}

/// Appends the recognized thinking fields of one body, in fixed order. The
/// three names are checked independently; a body may carry more than one.
fn collect_thinking(
    thinking: Option<&Value>,
    thought: Option<&Value>,
    reasoning: Option<&Value>,
    accumulator: &mut String,
) {
    for value in [thinking, thought, reasoning] {
        if value.is_some() {
            accumulator.push_str(&normalize_content(value));
        }
    }
}

fn collect_body(body: &ChunkBody, event: &mut StreamEvent) {
    collect_thinking(
        body.thinking.as_ref(),
        body.thought.as_ref(),
        body.reasoning.as_ref(),
        &mut event.thinking_delta,
    );
    event.answer_delta.push_str(&normalize_content(body.content.as_ref()));
}

/// Extracts all semantic signals from one fragment.
///
/// The rules are additive, applied in a fixed order: `message` first, then
/// every choice (`delta` before `message`), then the fragment's own top
/// level. Usage is last-write-wins: a top-level `usage` beats per-choice
/// ones, otherwise the last choice carrying one wins.
pub fn extract(fragment: &Fragment) -> StreamEvent {
    let mut event = StreamEvent::default();

    if let Some(message) = &fragment.message {
        collect_body(message, &mut event);
    }

    for choice in &fragment.choices {
        if let Some(delta) = &choice.delta {
            collect_body(delta, &mut event);
        }
        if let Some(message) = &choice.message {
            collect_body(message, &mut event);
        }
    }

    collect_thinking(
        fragment.thinking.as_ref(),
        fragment.thought.as_ref(),
        fragment.reasoning.as_ref(),
        &mut event.thinking_delta,
    );
    event
        .answer_delta
        .push_str(&normalize_content(fragment.content.as_ref()));

    event.usage = fragment.usage.clone().or_else(|| {
        fragment
            .choices
            .iter()
            .filter_map(|choice| choice.usage.clone())
            .last()
    });

    event
}
