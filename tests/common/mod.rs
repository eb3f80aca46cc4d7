#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Whisperers client integration tests.
//!
//! Provides a channel-backed [`MockTransport`] whose far end, a
//! [`MockServer`], lets a test push server chunks, inspect the commands the
//! client wrote, and check how many reads were ever in flight at once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use whisperers_client::{
    ChatClient, ChatConfig, ChatError, ChatEvent, Transport, TransportReader, TransportWriter,
};

/// How long helpers wait for something to happen before failing the test.
pub const WAIT: Duration = Duration::from_secs(2);

// ── MockTransport ───────────────────────────────────────────────────

/// Counts overlapping `receive` calls.
#[derive(Clone, Default)]
pub struct ReadProbe {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl ReadProbe {
    /// Highest number of `receive` calls ever in flight together.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of `receive` calls made so far.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count even when the read future is cancelled.
struct ActiveRead(Arc<AtomicUsize>);

impl ActiveRead {
    fn enter(probe: &ReadProbe) -> Self {
        let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        probe.peak.fetch_max(now, Ordering::SeqCst);
        probe.total.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(&probe.active))
    }
}

impl Drop for ActiveRead {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Client side of an in-memory connection.
pub struct MockTransport {
    reader: MockReader,
    writer: MockWriter,
}

pub struct MockReader {
    incoming: mpsc::UnboundedReceiver<Result<String, ChatError>>,
    probe: ReadProbe,
    closed: Arc<AtomicBool>,
}

pub struct MockWriter {
    sent: Arc<StdMutex<Vec<String>>>,
    sent_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Server side of an in-memory connection.
pub struct MockServer {
    /// Chunks for the client to read, one chunk per `receive`.
    pub feed: mpsc::UnboundedSender<Result<String, ChatError>>,
    /// Every command the client wrote, in order.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// The same commands, as they are written.
    pub sent_rx: mpsc::UnboundedReceiver<String>,
    /// Whether the client closed the read half.
    pub reader_closed: Arc<AtomicBool>,
    /// Whether the client closed the write half.
    pub writer_closed: Arc<AtomicBool>,
    pub probe: ReadProbe,
}

/// Create a connected transport/server pair.
pub fn mock_pair() -> (MockTransport, MockServer) {
    let (feed, incoming) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let reader_closed = Arc::new(AtomicBool::new(false));
    let writer_closed = Arc::new(AtomicBool::new(false));
    let probe = ReadProbe::default();

    let transport = MockTransport {
        reader: MockReader {
            incoming,
            probe: probe.clone(),
            closed: Arc::clone(&reader_closed),
        },
        writer: MockWriter {
            sent: Arc::clone(&sent),
            sent_tx,
            closed: Arc::clone(&writer_closed),
        },
    };
    let server = MockServer {
        feed,
        sent,
        sent_rx,
        reader_closed,
        writer_closed,
        probe,
    };
    (transport, server)
}

impl Transport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn into_split(self) -> (MockReader, MockWriter) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl TransportReader for MockReader {
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<String>, ChatError> {
        let _active = ActiveRead::enter(&self.probe);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::TransportClosed);
        }

        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.incoming.recv()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            },
            None => self.incoming.recv().await,
        };

        match next {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            // Server dropped its end.
            None => Err(ChatError::TransportClosed),
        }
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransportWriter for MockWriter {
    async fn send(&mut self, message: &str) -> Result<(), ChatError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::TransportClosed);
        }
        self.sent.lock().unwrap().push(message.to_string());
        let _ = self.sent_tx.send(message.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MockServer {
    /// Queue one chunk for the client.
    pub fn push(&self, chunk: &str) {
        self.feed.send(Ok(chunk.to_string())).unwrap();
    }

    /// Make the client's next read fail.
    pub fn fail(&self, error: ChatError) {
        self.feed.send(Err(error)).unwrap();
    }

    /// Snapshot of everything the client wrote so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait for the next command the client writes.
    pub async fn next_sent(&mut self) -> String {
        tokio::time::timeout(WAIT, self.sent_rx.recv())
            .await
            .expect("timed out waiting for a client command")
            .expect("client writer dropped")
    }

    pub fn transport_closed(&self) -> bool {
        self.reader_closed.load(Ordering::SeqCst) && self.writer_closed.load(Ordering::SeqCst)
    }
}

// ── Session helpers ─────────────────────────────────────────────────

/// Config with short read timeouts so tests switch modes quickly.
pub fn test_config() -> ChatConfig {
    ChatConfig::default()
        .with_stream_read_timeout(Duration::from_millis(10))
        .with_handshake_timeout(Some(WAIT))
        .with_quit_timeout(Duration::from_millis(200))
}

/// Start a session for `username` whose server first sends `first_listing`.
pub async fn start_session(
    username: &str,
    first_listing: &str,
) -> (
    ChatClient<MockTransport>,
    mpsc::Receiver<ChatEvent>,
    MockServer,
) {
    let (transport, server) = mock_pair();
    server.push(first_listing);
    let (client, events) = ChatClient::start(transport, username, test_config())
        .await
        .expect("session should start");
    (client, events, server)
}

/// Receive the next event, failing the test if none arrives in time.
pub async fn next_event(events: &mut mpsc::Receiver<ChatEvent>) -> ChatEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Consume the `DirectoryChanged` + `Connected` pair every session starts with.
pub async fn drain_handshake(events: &mut mpsc::Receiver<ChatEvent>) {
    let ev = next_event(events).await;
    assert!(
        matches!(ev, ChatEvent::DirectoryChanged(_)),
        "first event should be DirectoryChanged, got {ev:?}"
    );
    let ev = next_event(events).await;
    assert!(
        matches!(ev, ChatEvent::Connected),
        "second event should be Connected, got {ev:?}"
    );
}

/// Skip events until one matches `pred`, returning it.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<ChatEvent>, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    loop {
        let ev = next_event(events).await;
        if pred(&ev) {
            return ev;
        }
    }
}

/// Build listing text from `(name, password, current, max)` rows.
pub fn listing(rows: &[(&str, &str, u32, u32)]) -> String {
    rows.iter()
        .map(|(name, password, current, max)| format!("{name};{password};{current};{max}\n"))
        .collect()
}
