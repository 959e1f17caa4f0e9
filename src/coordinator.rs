//! Request issuing and single-session coordination.
//!
//! At most one session is "current". Submitting a new request cancels the
//! previous session and detaches it: cancellation is best-effort, so the
//! actual correctness mechanism is the identity check the coordinator applies
//! before forwarding events or clearing its current slot. A superseded
//! session may keep draining in the background, but none of its late events
//! or its terminal transition can touch the state of its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::request::ChatRequest;
use crate::session::{SessionError, SessionHandle, SessionStatus, StreamSession};
use crate::streaming::HttpChunkStream;
use crate::UpdateCallback;

/// Thin HTTP client for the chat completions endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Sends the request and classifies the response before any pumping
    /// happens: a non-2xx status fails the session immediately, with the
    /// body text as detail.
    async fn open_stream(&self, request: &ChatRequest) -> Result<HttpChunkStream, SessionError> {
        debug!("Sending streaming request to {}", self.completions_url());

        let response = self
            .http
            .post(self.completions_url())
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SessionError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(HttpChunkStream::new(response))
    }
}

struct CurrentSession {
    id: u64,
    handle: SessionHandle,
}

/// A session accepted by [`RequestCoordinator::submit`]. Holds the drive
/// task; the handle stays usable for cancellation and state snapshots.
pub struct SubmittedSession {
    pub handle: SessionHandle,
    task: JoinHandle<SessionStatus>,
}

impl SubmittedSession {
    /// Waits for the session to reach a terminal state.
    pub async fn join(self) -> SessionStatus {
        match self.task.await {
            Ok(status) => status,
            Err(_) => self.handle.status(),
        }
    }
}

/// Owns the single "current session" slot.
pub struct RequestCoordinator {
    client: ChatClient,
    current: Arc<Mutex<Option<CurrentSession>>>,
    next_id: AtomicU64,
}

impl RequestCoordinator {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts a new session, cancelling and superseding any running one.
    ///
    /// `callback` only sees events while this session is still current;
    /// events from a session that has been superseded are dropped silently.
    pub fn submit(&self, request: ChatRequest, callback: UpdateCallback) -> SubmittedSession {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let current = Arc::clone(&self.current);
        let guarded: UpdateCallback = Box::new(move |chunk| {
            let is_current = current
                .lock()
                .unwrap()
                .as_ref()
                .map(|session| session.id)
                == Some(id);
            if is_current {
                callback(chunk)
            } else {
                Ok(())
            }
        });

        let session = StreamSession::new(guarded);
        let handle = session.handle();

        {
            let mut current = self.current.lock().unwrap();
            if let Some(previous) = current.take() {
                debug!("Superseding session {} with session {}", previous.id, id);
                previous.handle.cancel();
            }
            *current = Some(CurrentSession {
                id,
                handle: handle.clone(),
            });
        }

        let client = self.client.clone();
        let current = Arc::clone(&self.current);
        let task = tokio::spawn(async move {
            let status = match client.open_stream(&request).await {
                Ok(stream) => session.run(stream).await,
                Err(error) => session.fail(error),
            };

            // Only the session that is still current may clear the slot; a
            // superseded session's late terminal transition must not clobber
            // its successor.
            let mut current = current.lock().unwrap();
            if current.as_ref().map(|session| session.id) == Some(id) {
                *current = None;
            }
            status
        });

        SubmittedSession { handle, task }
    }

    /// Cancels the current session, if any, and clears the slot.
    pub fn cancel_current(&self) {
        if let Some(session) = self.current.lock().unwrap().take() {
            session.handle.cancel();
        }
    }

    /// Whether a session is currently registered as active.
    pub fn is_busy(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }
}
