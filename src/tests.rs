use super::*;
use axum::body::Body;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// One scripted response body; the mock server serves them in request order.
enum MockBody {
    /// Fixed chunk sequence with explicit chunk boundaries.
    Chunks(Vec<Vec<u8>>),
    /// Open-ended stream fed from the test, for hanging-session scenarios.
    Channel(UnboundedReceiver<Vec<u8>>),
    /// Non-2xx response with a plain body.
    Error(u16, String),
}

async fn serve_script(bodies: Vec<MockBody>) -> String {
    let queue = Arc::new(Mutex::new(VecDeque::from(bodies)));

    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let queue = Arc::clone(&queue);
            async move {
                let body = queue
                    .lock()
                    .unwrap()
                    .pop_front()
                    .expect("mock server got more requests than scripted");

                match body {
                    MockBody::Chunks(chunks) => {
                        let stream = stream::iter(
                            chunks
                                .into_iter()
                                .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk))),
                        );
                        Response::builder()
                            .status(200)
                            .header("content-type", "application/x-ndjson")
                            .body(Body::from_stream(stream))
                            .unwrap()
                    }
                    MockBody::Channel(receiver) => {
                        let stream =
                            receiver.map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk)));
                        Response::builder()
                            .status(200)
                            .header("content-type", "application/x-ndjson")
                            .body(Body::from_stream(stream))
                            .unwrap()
                    }
                    MockBody::Error(status, text) => Response::builder()
                        .status(status)
                        .body(Body::from(text))
                        .unwrap(),
                }
            }
        }),
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(addr).await.unwrap();
    let server_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", server_addr)
}

/// Collects callback deltas, tagged by channel, in arrival order.
#[derive(Clone, Default)]
struct ChunkCollector {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl ChunkCollector {
    fn callback(&self) -> UpdateCallback {
        let chunks = Arc::clone(&self.chunks);
        Box::new(move |chunk| {
            let rendered = match chunk {
                StreamingChunk::Thinking(text) => format!("think:{text}"),
                StreamingChunk::Answer(text) => format!("answer:{text}"),
            };
            chunks.lock().unwrap().push(rendered);
            Ok(())
        })
    }

    fn rendered(&self) -> Vec<String> {
        self.chunks.lock().unwrap().clone()
    }

    fn answer_text(&self) -> String {
        self.rendered()
            .iter()
            .filter_map(|chunk| chunk.strip_prefix("answer:"))
            .collect()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

fn lines(fragments: &[&str]) -> Vec<Vec<u8>> {
    fragments
        .iter()
        .map(|fragment| fragment.as_bytes().to_vec())
        .collect()
}

#[tokio::test]
async fn streams_ollama_style_chunks() {
    let base_url = serve_script(vec![MockBody::Chunks(lines(&[
        "{\"message\":{\"thinking\":\"let me see. \"},\"done\":false}\n",
        "{\"message\":{\"content\":\"Hi!\"},\"done\":false}\n",
        "{\"message\":{\"content\":\" How can I help?\"},\"done\":true,\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":8,\"total_tokens\":18}}\n",
    ]))])
    .await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("Hello")]),
        collector.callback(),
    );

    let handle = submitted.handle.clone();
    assert_eq!(submitted.join().await, SessionStatus::Completed);

    let state = handle.snapshot();
    assert_eq!(state.thinking, "let me see. ");
    assert_eq!(state.answer, "Hi! How can I help?");
    let usage = state.usage.unwrap();
    assert_eq!(usage.total_tokens, Some(18));
    assert_eq!(usage.prompt_tokens, Some(10));
    assert!(state.elapsed.is_some());
    assert_eq!(
        collector.rendered(),
        vec![
            "think:let me see. ".to_string(),
            "answer:Hi!".to_string(),
            "answer: How can I help?".to_string(),
        ]
    );
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn streams_openai_delta_chunks_split_across_boundaries() {
    // Chunk boundaries deliberately fall inside lines.
    let base_url = serve_script(vec![MockBody::Chunks(lines(&[
        "{\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n{\"choices\":[{\"del",
        "ta\":{\"content\":\"lo\"}}]}\n",
        "{\"choices\":[{\"delta\":{},\"usage\":{\"total_tokens\":7}}]}",
    ]))])
    .await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("gpt-4o", vec![ChatMessage::user("Hello")]),
        collector.callback(),
    );

    let handle = submitted.handle.clone();
    assert_eq!(submitted.join().await, SessionStatus::Completed);

    let state = handle.snapshot();
    assert_eq!(state.answer, "Hello");
    // The final usage-only line is unterminated and recovered by the flush.
    assert_eq!(state.usage.unwrap().total_tokens, Some(7));
    assert_eq!(collector.answer_text(), "Hello");
}

#[tokio::test]
async fn multibyte_answer_split_across_transport_chunks() {
    let line = "{\"message\":{\"content\":\"你好，世界\"}}\n";
    // Chunk boundary one byte into the encoding of 世.
    let cut = line.find('世').unwrap() + 1;
    let bytes = line.as_bytes();
    let base_url = serve_script(vec![MockBody::Chunks(vec![
        bytes[..cut].to_vec(),
        bytes[cut..].to_vec(),
    ])])
    .await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("你好")]),
        collector.callback(),
    );

    let handle = submitted.handle.clone();
    assert_eq!(submitted.join().await, SessionStatus::Completed);
    assert_eq!(handle.snapshot().answer, "你好，世界");
    assert_eq!(collector.answer_text(), "你好，世界");
}

#[tokio::test]
async fn malformed_fragment_is_skipped_mid_stream() {
    let base_url = serve_script(vec![MockBody::Chunks(lines(&[
        "{\"message\":{\"content\":\"before \"}}\n",
        "{this is not json\n",
        "\n",
        "{\"message\":{\"content\":\"after\"}}\n",
    ]))])
    .await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("hi")]),
        collector.callback(),
    );

    let handle = submitted.handle.clone();
    assert_eq!(submitted.join().await, SessionStatus::Completed);
    assert_eq!(handle.snapshot().answer, "before after");
}

#[tokio::test]
async fn http_error_fails_without_pumping() {
    let base_url = serve_script(vec![MockBody::Error(500, "backend exploded".to_string())]).await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("hi")]),
        collector.callback(),
    );

    let handle = submitted.handle.clone();
    assert_eq!(submitted.join().await, SessionStatus::Failed);

    let state = handle.snapshot();
    assert_eq!(state.answer, "");
    assert_eq!(state.thinking, "");
    let failure = state.failure.unwrap();
    assert!(failure.contains("500"), "failure was: {failure}");
    assert!(failure.contains("backend exploded"), "failure was: {failure}");
    assert!(collector.rendered().is_empty());
    // The coordinator recovered to idle and accepts the next submit.
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn resubmit_supersedes_the_running_session() {
    let (first_sender, first_receiver): (UnboundedSender<Vec<u8>>, _) = unbounded();
    let base_url = serve_script(vec![
        MockBody::Channel(first_receiver),
        MockBody::Chunks(lines(&["{\"message\":{\"content\":\"second\"}}\n"])),
    ])
    .await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));

    let first_collector = ChunkCollector::default();
    let first = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("one")]),
        first_collector.callback(),
    );
    first_sender
        .unbounded_send(b"{\"message\":{\"content\":\"first \"}}\n".to_vec())
        .unwrap();
    let first_handle = first.handle.clone();
    wait_until(|| first_handle.snapshot().answer == "first ").await;

    // Second submit cancels and detaches the first session.
    let second_collector = ChunkCollector::default();
    let second = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("two")]),
        second_collector.callback(),
    );
    // The first session's transport has not torn down yet; late bytes arrive.
    first_sender
        .unbounded_send(b"{\"message\":{\"content\":\"LATE\"}}\n".to_vec())
        .unwrap();

    let second_handle = second.handle.clone();
    assert_eq!(second.join().await, SessionStatus::Completed);
    assert_eq!(second_handle.snapshot().answer, "second");
    assert_eq!(second_collector.answer_text(), "second");

    assert_eq!(first.join().await, SessionStatus::Aborted);
    // Late events from the superseded session reached neither its own
    // accumulated text nor the new session's.
    assert_eq!(first_handle.snapshot().answer, "first ");
    assert_eq!(first_collector.answer_text(), "first ");
    assert_eq!(second_handle.snapshot().answer, "second");
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn cancel_surfaces_as_aborted_not_failed() {
    let (sender, receiver): (UnboundedSender<Vec<u8>>, _) = unbounded();
    let base_url = serve_script(vec![MockBody::Channel(receiver)]).await;

    let coordinator = RequestCoordinator::new(ChatClient::new(base_url));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("hi")]),
        collector.callback(),
    );
    sender
        .unbounded_send(b"{\"message\":{\"content\":\"partial\"}}\n".to_vec())
        .unwrap();
    let handle = submitted.handle.clone();
    wait_until(|| handle.snapshot().answer == "partial").await;

    coordinator.cancel_current();
    // Wake the pump so it observes the flag.
    let _ = sender.unbounded_send(b"{\"message\":{\"content\":\"ignored\"}}\n".to_vec());

    assert_eq!(submitted.join().await, SessionStatus::Aborted);
    let state = handle.snapshot();
    assert_eq!(state.status, SessionStatus::Aborted);
    assert_eq!(state.answer, "partial");
    assert!(state.failure.is_none());
    assert!(state.elapsed.is_some());
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn trailing_slash_in_base_url_is_tolerated() {
    let base_url = serve_script(vec![MockBody::Chunks(lines(&[
        "{\"message\":{\"content\":\"ok\"}}\n",
    ]))])
    .await;

    let coordinator = RequestCoordinator::new(ChatClient::new(format!("{base_url}/")));
    let collector = ChunkCollector::default();
    let submitted = coordinator.submit(
        ChatRequest::new("qwen3:30b", vec![ChatMessage::user("hi")]),
        collector.callback(),
    );

    let handle = submitted.handle.clone();
    assert_eq!(submitted.join().await, SessionStatus::Completed);
    assert_eq!(handle.snapshot().answer, "ok");
}
