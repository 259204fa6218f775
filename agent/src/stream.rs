//! Stream Multiplexer (§4.5): renders an [`InternalEvent`] sequence as SSE
//! frames while a best-effort title-generation task runs alongside it,
//! guaranteeing exactly one terminal frame regardless of how either
//! producer finishes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use backend_protocol::InternalEvent;
use backend_protocol::ThreadId;
use backend_storage::ThreadRepository;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::llm::LlmClientKind;
use crate::llm::LlmClient;

const QUEUE_CAPACITY: usize = 64;
const TITLE_SOURCE_CHARS: usize = 100;
const TITLE_MAX_CHARS: usize = 20;

enum MuxMessage {
    Frame(String),
    ProducerDone,
}

pub struct StreamMultiplexer {
    llm: Arc<dyn LlmClient>,
    threads: Arc<dyn ThreadRepository>,
}

impl StreamMultiplexer {
    pub fn new(llm: Arc<dyn LlmClient>, threads: Arc<dyn ThreadRepository>) -> Self {
        Self { llm, threads }
    }

    /// Merges `agent_events` with a parallel title-generation task into a
    /// single stream of formatted SSE frames, terminated by exactly one
    /// `end` frame.
    pub fn multiplex<S>(
        &self,
        thread: ThreadId,
        user_message: String,
        agent_events: S,
    ) -> ReceiverStream<String>
    where
        S: Stream<Item = InternalEvent> + Send + Unpin + 'static,
    {
        let (inner_tx, mut inner_rx) = mpsc::channel::<MuxMessage>(QUEUE_CAPACITY);
        let countdown = Arc::new(AtomicUsize::new(2));
        let errored = Arc::new(AtomicBool::new(false));

        spawn_agent_producer(agent_events, inner_tx.clone(), countdown.clone(), errored.clone());
        spawn_title_producer(
            self.llm.clone(),
            self.threads.clone(),
            thread,
            user_message,
            inner_tx,
            countdown,
        );

        let (out_tx, out_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(message) = inner_rx.recv().await {
                match message {
                    MuxMessage::Frame(frame) => {
                        if out_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    MuxMessage::ProducerDone => break,
                }
            }
            let action = errored.load(Ordering::SeqCst).then_some("error".to_string());
            let _ = out_tx
                .send(InternalEvent::Done { action }.to_sse_frame())
                .await;
        });
        ReceiverStream::new(out_rx)
    }
}

fn spawn_agent_producer<S>(
    mut agent_events: S,
    tx: mpsc::Sender<MuxMessage>,
    countdown: Arc<AtomicUsize>,
    errored: Arc<AtomicBool>,
) where
    S: Stream<Item = InternalEvent> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = agent_events.next().await {
            // The agent's own `Done` is swallowed: the multiplexer's
            // consumer loop is the sole source of the terminal frame, so
            // a disconnected title task can never leave two `end` frames
            // (or zero) on the wire.
            if let InternalEvent::Done { action } = &event {
                if action.is_some() {
                    errored.store(true, Ordering::SeqCst);
                }
                break;
            }
            if tx.send(MuxMessage::Frame(event.to_sse_frame())).await.is_err() {
                break;
            }
        }
        if countdown.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = tx.send(MuxMessage::ProducerDone).await;
        }
    });
}

fn spawn_title_producer(
    llm: Arc<dyn LlmClient>,
    threads: Arc<dyn ThreadRepository>,
    thread: ThreadId,
    user_message: String,
    tx: mpsc::Sender<MuxMessage>,
    countdown: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        if let Some(title) = generate_title(&llm, &threads, &thread, &user_message).await {
            let frame = InternalEvent::TitleUpdated { title }.to_sse_frame();
            let _ = tx.send(MuxMessage::Frame(frame)).await;
        }
        if countdown.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = tx.send(MuxMessage::ProducerDone).await;
        }
    });
}

/// Invokes the flash model with the first 100 characters of the user's
/// message, truncates the result to 20 characters, and persists it iff
/// the thread's title is still unset. Swallows any failure quietly
/// (§4.5: "on failure, swallow quietly and decrement the countdown").
async fn generate_title(
    llm: &Arc<dyn LlmClient>,
    threads: &Arc<dyn ThreadRepository>,
    thread: &ThreadId,
    user_message: &str,
) -> Option<String> {
    let source: String = user_message.chars().take(TITLE_SOURCE_CHARS).collect();
    let prompt = format!("Give a short title for this request:\n{source}");
    let raw = llm.complete(LlmClientKind::Flash, &prompt).await.ok()?;
    let title: String = raw.trim().chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        return None;
    }
    match threads.set_title_if_unset(thread, &title).await {
        Ok(true) => Some(title),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_llm::FakeLlmClient;
    use backend_protocol::UserId;
    use backend_storage::InMemoryThreadRepository;

    #[tokio::test]
    async fn exactly_one_end_frame_on_clean_completion() {
        let events = ReceiverStream::new({
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                let _ = tx.send(InternalEvent::Token { text: "hi".into() }).await;
                let _ = tx.send(InternalEvent::Done { action: None }).await;
            });
            rx
        });
        let threads: Arc<dyn ThreadRepository> = Arc::new(InMemoryThreadRepository::new());
        let user = UserId::new();
        let thread = ThreadId::new(user);
        threads.create(thread.clone(), user).await.unwrap();

        let llm: Arc<dyn LlmClient> =
            Arc::new(FakeLlmClient::new(vec![]).with_completions(vec!["Echo task".into()]));
        let mux = StreamMultiplexer::new(llm, threads);
        let mut out = mux.multiplex(thread, "please echo hi".into(), events);

        let mut frames = Vec::new();
        while let Some(frame) = out.next().await {
            frames.push(frame);
        }
        let end_count = frames.iter().filter(|f| f.starts_with("event: end")).count();
        assert_eq!(end_count, 1);
        assert!(frames.last().unwrap().starts_with("event: end"));
    }

    #[tokio::test]
    async fn title_frame_is_suppressed_once_title_already_set() {
        let events = ReceiverStream::new({
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                let _ = tx.send(InternalEvent::Done { action: None }).await;
            });
            rx
        });
        let threads: Arc<dyn ThreadRepository> = Arc::new(InMemoryThreadRepository::new());
        let user = UserId::new();
        let thread = ThreadId::new(user);
        threads.create(thread.clone(), user).await.unwrap();
        threads.set_title_if_unset(&thread, "already set").await.unwrap();

        let llm: Arc<dyn LlmClient> =
            Arc::new(FakeLlmClient::new(vec![]).with_completions(vec!["New title".into()]));
        let mux = StreamMultiplexer::new(llm, threads);
        let mut out = mux.multiplex(thread, "hello".into(), events);

        let mut frames = Vec::new();
        while let Some(frame) = out.next().await {
            frames.push(frame);
        }
        assert!(!frames.iter().any(|f| f.starts_with("event: title_updated")));
    }
}
