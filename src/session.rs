//! One streaming request lifecycle: pump, accumulate, terminate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::decode::{decode_line, DecodedLine};
use crate::extract::{extract, StreamEvent, UsageStats};
use crate::framing::LineBuffer;
use crate::streaming::ChunkStream;
use crate::{StreamingChunk, UpdateCallback};

/// Lifecycle of one session. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    /// Body exhausted normally.
    Completed,
    /// Cancellation requested; distinct from an error.
    Aborted,
    /// Transport-level failure (non-2xx status, network error, missing body).
    Failed,
}

/// Session-fatal failures. Decode failures are not in here: a malformed line
/// is skipped with a diagnostic and never terminates the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("backend returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("stopped by user")]
    Cancelled,
}

/// Shared, observable state of one session. Text accumulators only grow
/// while the session is running; the latest non-null usage report wins.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub thinking: String,
    pub answer: String,
    pub usage: Option<UsageStats>,
    pub status: SessionStatus,
    /// Human-readable detail when `status` is `Failed`.
    pub failure: Option<String>,
    /// Wall-clock duration, recorded once a terminal state is reached.
    pub elapsed: Option<Duration>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            thinking: String::new(),
            answer: String::new(),
            usage: None,
            status: SessionStatus::Running,
            failure: None,
            elapsed: None,
        }
    }
}

/// Cloneable view of a session: observe its state, request cancellation.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
    cancel: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Requests cooperative cancellation. The pump consults the flag between
    /// chunks; bytes still in flight are discarded, not processed.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }
}

/// Owns one request lifecycle: frames incoming bytes into lines, runs each
/// line through decode and extract, applies the resulting events, and invokes
/// the update callback for every non-empty delta.
pub struct StreamSession {
    buffer: LineBuffer,
    /// Incomplete UTF-8 suffix of the previous chunk; transport chunk
    /// boundaries may fall inside a multi-byte character.
    carry: Vec<u8>,
    state: Arc<Mutex<SessionState>>,
    cancel: Arc<AtomicBool>,
    callback: UpdateCallback,
    started: Instant,
}

impl StreamSession {
    pub fn new(callback: UpdateCallback) -> Self {
        Self {
            buffer: LineBuffer::new(),
            carry: Vec::new(),
            state: Arc::new(Mutex::new(SessionState::new())),
            cancel: Arc::new(AtomicBool::new(false)),
            callback,
            started: Instant::now(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            state: Arc::clone(&self.state),
            cancel: Arc::clone(&self.cancel),
        }
    }

    fn is_running(&self) -> bool {
        !self.cancel.load(Ordering::SeqCst)
            && self.state.lock().unwrap().status == SessionStatus::Running
    }

    /// Processes one block of newly arrived body bytes. Ignored entirely
    /// once the session has left the running state.
    pub fn pump(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        if !self.is_running() {
            return Ok(());
        }

        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let valid_len = match std::str::from_utf8(&bytes) {
            Ok(_) => bytes.len(),
            // An incomplete trailing character is not corruption; hold its
            // bytes back until the next chunk completes it.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(SessionError::Network(format!(
                    "invalid UTF-8 in response body: {e}"
                )))
            }
        };
        self.carry = bytes.split_off(valid_len);

        let text = String::from_utf8(bytes)
            .map_err(|e| SessionError::Network(format!("invalid UTF-8 in response body: {e}")))?;

        for line in self.buffer.feed(&text) {
            self.process_line(&line)?;
        }
        Ok(())
    }

    /// End-of-body: the backend may leave the final fragment unterminated,
    /// so the residual buffer content goes through the same pipeline.
    pub fn finish(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Some(line) = self.buffer.flush() {
            // A callback refusal at this point no longer matters.
            let _ = self.process_line(&line);
        }
        self.transition(SessionStatus::Completed, None);
    }

    fn process_line(&mut self, line: &str) -> Result<(), SessionError> {
        match decode_line(line) {
            DecodedLine::Blank => Ok(()),
            DecodedLine::Malformed { raw } => {
                warn!("Skipping malformed stream fragment: '{}'", raw);
                Ok(())
            }
            DecodedLine::Fragment(fragment) => {
                debug!("Received stream fragment: '{}'", line);
                self.apply_event(extract(&fragment))
            }
        }
    }

    fn apply_event(&mut self, event: StreamEvent) -> Result<(), SessionError> {
        if event.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.state.lock().unwrap();
            state.thinking.push_str(&event.thinking_delta);
            state.answer.push_str(&event.answer_delta);
            if let Some(usage) = &event.usage {
                state.usage = Some(usage.clone());
            }
        }

        // Callback runs outside the lock. An error from it is the UI asking
        // to stop, which maps to cancellation.
        if !event.thinking_delta.is_empty() {
            (self.callback)(&StreamingChunk::Thinking(event.thinking_delta))
                .map_err(|_| SessionError::Cancelled)?;
        }
        if !event.answer_delta.is_empty() {
            (self.callback)(&StreamingChunk::Answer(event.answer_delta))
                .map_err(|_| SessionError::Cancelled)?;
        }
        Ok(())
    }

    /// Marks the session failed before any bytes were pumped, e.g. on a
    /// non-2xx response. Turns into `Aborted` instead when cancellation has
    /// already been requested.
    pub fn fail(mut self, error: SessionError) -> SessionStatus {
        if self.cancel.load(Ordering::SeqCst) {
            self.transition(SessionStatus::Aborted, None);
        } else {
            warn!("Streaming session failed: {}", error);
            self.transition(SessionStatus::Failed, Some(error.to_string()));
        }
        self.status()
    }

    fn transition(&mut self, status: SessionStatus, failure: Option<String>) {
        let mut state = self.state.lock().unwrap();
        if state.status != SessionStatus::Running {
            return;
        }
        state.status = status;
        state.failure = failure;
        state.elapsed = Some(self.started.elapsed());
    }

    fn status(&self) -> SessionStatus {
        self.state.lock().unwrap().status
    }

    /// Drives the session to a terminal state by pumping `source` dry. The
    /// cancellation flag is consulted before each read; a transport error
    /// after cancellation reports as `Aborted`, not `Failed`.
    pub async fn run<S: ChunkStream>(mut self, mut source: S) -> SessionStatus {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                self.transition(SessionStatus::Aborted, None);
                break;
            }
            match source.next_chunk().await {
                Ok(Some(chunk)) => match self.pump(&chunk) {
                    Ok(()) => {}
                    Err(SessionError::Cancelled) => {
                        self.transition(SessionStatus::Aborted, None);
                        break;
                    }
                    Err(error) => {
                        warn!("Streaming session failed: {}", error);
                        self.transition(SessionStatus::Failed, Some(error.to_string()));
                        break;
                    }
                },
                Ok(None) => {
                    if self.cancel.load(Ordering::SeqCst) {
                        self.transition(SessionStatus::Aborted, None);
                    } else {
                        self.finish();
                    }
                    break;
                }
                Err(error) => {
                    if self.cancel.load(Ordering::SeqCst) {
                        self.transition(SessionStatus::Aborted, None);
                    } else {
                        warn!("Streaming session failed: {}", error);
                        self.transition(
                            SessionStatus::Failed,
                            Some(SessionError::Network(error.to_string()).to_string()),
                        );
                    }
                    break;
                }
            }
        }
        self.status()
    }
}
