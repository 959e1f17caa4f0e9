//! Incremental streaming-response core for an LLM chat front end
//!
//! This crate implements:
//! - Framing of a chunked response body into newline-delimited JSON lines
//! - Tolerant decoding of heterogeneous fragment shapes (Ollama-style
//!   `message` chunks, OpenAI-style `choices[].delta` / `choices[].message`
//!   chunks, flat chunks)
//! - Additive extraction of thinking deltas, answer deltas and usage stats
//! - A session state machine with cooperative cancellation
//! - A coordinator that keeps at most one session current at a time
//!
//! The view layer is an external collaborator: it supplies the request and an
//! update callback, and renders the accumulated session state.

#[cfg(test)]
mod tests;

pub mod config;
pub mod coordinator;
pub mod decode;
pub mod extract;
pub mod framing;
pub mod normalize;
pub mod request;
pub mod session;
pub mod streaming;

pub use config::ChatConfig;
pub use coordinator::{ChatClient, RequestCoordinator, SubmittedSession};
pub use decode::{decode_line, DecodedLine};
pub use extract::{extract, Choice, ChunkBody, Fragment, StreamEvent, UsageStats};
pub use framing::LineBuffer;
pub use normalize::normalize_content;
pub use request::{to_data_url, ChatMessage, ChatRequest, ContentPart, MessageContent};
pub use session::{SessionError, SessionHandle, SessionState, SessionStatus, StreamSession};
pub use streaming::{ChunkStream, HttpChunkStream};

use anyhow::Result;

/// One incremental update pushed to the view layer while a session runs.
#[derive(Debug, Clone)]
pub enum StreamingChunk {
    /// Delta for the thinking stream, rendered separately from the answer.
    Thinking(String),
    /// Delta for the answer stream.
    Answer(String),
}

/// Callback receiving every non-empty delta. Returning an error asks the
/// session to stop (treated as cancellation, not failure).
pub type UpdateCallback = Box<dyn Fn(&StreamingChunk) -> Result<()> + Send + Sync>;
