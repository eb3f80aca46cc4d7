//! Single-reader gate over the transport's read half.
//!
//! Two strategies read from the same connection: foreground polling (lobby
//! ticks and blocking reply reads) and a background stream reader that runs
//! while the session is in a room. Every read goes through one
//! `tokio::sync::Mutex` around the reader, so at most one read is ever in
//! flight. Switching modes stops and joins the stream task before the
//! foreground reads again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::event::EndReason;
use crate::transport::{TransportReader, TransportWriter};

struct StreamTask {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the read half and decides who may read it.
pub(crate) struct ReadArbiter<R> {
    reader: Arc<Mutex<R>>,
    stream: Option<StreamTask>,
    /// Bound on a single stream read, so the task re-checks for a stop
    /// request at least this often.
    read_timeout: Duration,
    /// How long [`stop_stream`](Self::stop_stream) waits before aborting.
    stop_timeout: Duration,
    closed: bool,
}

impl<R: TransportReader> ReadArbiter<R> {
    pub(crate) fn new(reader: R, read_timeout: Duration, stop_timeout: Duration) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            stream: None,
            read_timeout,
            stop_timeout,
            closed: false,
        }
    }

    /// One non-blocking read: a chunk if one is ready, otherwise `None`.
    pub(crate) async fn poll(&self) -> Result<Option<String>> {
        self.reader.lock().await.try_receive().await
    }

    /// Block until the next chunk arrives.
    pub(crate) async fn read_blocking(&self) -> Result<Option<String>> {
        self.reader.lock().await.receive(None).await
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|stream| !stream.task.is_finished())
    }

    /// Spawn the background stream reader.
    ///
    /// Every chunk it reads goes to `dispatcher`. If the server shuts down or
    /// the connection fails, the task terminates the session and closes both
    /// halves, which is why it also holds the writer.
    pub(crate) fn start_stream<W: TransportWriter>(
        &mut self,
        dispatcher: Dispatcher,
        writer: Arc<Mutex<W>>,
    ) {
        if self.is_streaming() {
            debug!("stream reader already running");
            return;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(stream_loop(
            Arc::clone(&self.reader),
            writer,
            dispatcher,
            self.read_timeout,
            stop_rx,
        ));
        self.stream = Some(StreamTask { stop_tx, task });
    }

    /// Stop the stream reader and wait for it to exit.
    ///
    /// When this returns no background read is in flight. A task that does
    /// not exit within the stop timeout is aborted.
    pub(crate) async fn stop_stream(&mut self) {
        let Some(StreamTask { stop_tx, mut task }) = self.stream.take() else {
            return;
        };

        // The task may already have exited on its own.
        let _ = stop_tx.send(());

        match tokio::time::timeout(self.stop_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!("stream reader terminated with join error: {join_err}");
            }
            Err(_) => {
                warn!("stream reader did not exit within timeout; aborting task");
                task.abort();
                if let Err(join_err) = task.await {
                    debug!("stream reader aborted: {join_err}");
                }
            }
        }
    }

    /// Stop all reading and close the read half. Idempotent.
    pub(crate) async fn close(&mut self) {
        self.stop_stream().await;
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.reader.lock().await.close().await {
            debug!("closing read half failed: {e}");
        }
    }
}

impl<R> Drop for ReadArbiter<R> {
    fn drop(&mut self) {
        // No executor context to await a graceful stop here.
        if let Some(stream) = self.stream.take() {
            stream.task.abort();
        }
    }
}

// ── Stream reader ───────────────────────────────────────────────────

/// Background reader used while the session is in a room.
///
/// Exits when:
/// - a stop is requested (or the arbiter is dropped)
/// - the server announces `SERVER_SHUTDOWN`
/// - the connection fails
async fn stream_loop<R, W>(
    reader: Arc<Mutex<R>>,
    writer: Arc<Mutex<W>>,
    dispatcher: Dispatcher,
    read_timeout: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) where
    R: TransportReader,
    W: TransportWriter,
{
    debug!("stream reader started");

    loop {
        let received = {
            let mut gate = reader.lock().await;
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    debug!("stream reader stopped");
                    return;
                }
                received = gate.receive(Some(read_timeout)) => received,
            }
        };

        match received {
            // Timed out; go round and look for a stop request.
            Ok(None) => {}
            Ok(Some(chunk)) => {
                if dispatcher.dispatch(&chunk, None).await.shutdown {
                    break;
                }
            }
            Err(e) => {
                error!("stream reader failed: {e}");
                dispatcher
                    .terminate(EndReason::Disconnected(e.to_string()))
                    .await;
                break;
            }
        }
    }

    if let Err(e) = reader.lock().await.close().await {
        debug!("closing read half failed: {e}");
    }
    if let Err(e) = writer.lock().await.close().await {
        debug!("closing write half failed: {e}");
    }
    debug!("stream reader exited");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::dispatch::SharedState;
    use crate::error::ChatError;
    use crate::event::ChatEvent;
    use crate::state::SessionState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Reader fed from a channel that records how many reads overlap.
    struct ChannelReader {
        rx: mpsc::UnboundedReceiver<Result<String>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TransportReader for ChannelReader {
        async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let next = match timeout {
                Some(limit) => tokio::time::timeout(limit, self.rx.recv()).await.ok(),
                None => Some(self.rx.recv().await),
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            match next {
                None => Ok(None),
                Some(Some(item)) => item.map(Some),
                Some(None) => Err(ChatError::TransportClosed),
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullWriter {
        closed: bool,
    }

    #[async_trait]
    impl TransportWriter for NullWriter {
        async fn send(&mut self, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    struct Harness {
        arbiter: ReadArbiter<ChannelReader>,
        feed: mpsc::UnboundedSender<Result<String>>,
        peak: Arc<AtomicUsize>,
        reader_closed: Arc<AtomicBool>,
        writer: Arc<Mutex<NullWriter>>,
        dispatcher: Dispatcher,
        events: mpsc::Receiver<ChatEvent>,
    }

    async fn harness() -> Harness {
        let (feed, rx) = mpsc::unbounded_channel();
        let peak = Arc::new(AtomicUsize::new(0));
        let reader_closed = Arc::new(AtomicBool::new(false));
        let reader = ChannelReader {
            rx,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
            closed: Arc::clone(&reader_closed),
        };

        let shared = Arc::new(SharedState::new(true));
        shared.transition("test", SessionState::Lobby).await.unwrap();
        shared
            .transition("test", SessionState::AwaitingJoinReply)
            .await
            .unwrap();
        shared
            .transition("test", SessionState::InRoom { room: "r".into() })
            .await
            .unwrap();
        let (event_tx, events) = mpsc::channel(32);

        Harness {
            arbiter: ReadArbiter::new(
                reader,
                Duration::from_millis(20),
                Duration::from_millis(500),
            ),
            feed,
            peak,
            reader_closed,
            writer: Arc::new(Mutex::new(NullWriter::default())),
            dispatcher: Dispatcher::new(shared, event_tx, Duration::from_millis(100)),
            events,
        }
    }

    #[tokio::test]
    async fn stream_delivers_chat_and_stops_on_request() {
        let mut h = harness().await;
        h.arbiter
            .start_stream(h.dispatcher.clone(), Arc::clone(&h.writer));
        assert!(h.arbiter.is_streaming());

        h.feed.send(Ok("MESSAGE;alice;hi".to_string())).unwrap();
        match h.events.recv().await.unwrap() {
            ChatEvent::ChatMessage { username, text } => {
                assert_eq!(username, "alice");
                assert_eq!(text, "hi");
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }

        h.arbiter.stop_stream().await;
        assert!(!h.arbiter.is_streaming());

        // Data that arrives after the stop is left for the foreground.
        h.feed.send(Ok("NO_ROOMS".to_string())).unwrap();
        assert_eq!(h.arbiter.poll().await.unwrap().as_deref(), Some("NO_ROOMS"));
        assert!(h.peak.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn shutdown_in_stream_terminates_and_closes() {
        let mut h = harness().await;
        h.arbiter
            .start_stream(h.dispatcher.clone(), Arc::clone(&h.writer));

        h.feed.send(Ok("SERVER_SHUTDOWN".to_string())).unwrap();
        assert!(matches!(
            h.events.recv().await.unwrap(),
            ChatEvent::SessionEnded {
                reason: EndReason::ServerShutdown
            }
        ));

        h.arbiter.stop_stream().await;
        assert!(h.reader_closed.load(Ordering::SeqCst));
        assert!(h.writer.lock().await.closed);
        assert!(h.dispatcher.shared().state().await.is_terminated());
    }

    #[tokio::test]
    async fn read_failure_in_stream_is_a_disconnect() {
        let mut h = harness().await;
        h.arbiter
            .start_stream(h.dispatcher.clone(), Arc::clone(&h.writer));

        h.feed
            .send(Err(ChatError::TransportReceive("reset".into())))
            .unwrap();
        match h.events.recv().await.unwrap() {
            ChatEvent::SessionEnded {
                reason: EndReason::Disconnected(reason),
            } => assert!(reason.contains("reset")),
            other => panic!("expected SessionEnded, got {other:?}"),
        }
        assert!(!h.dispatcher.shared().notify_on_close());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut h = harness().await;
        h.arbiter
            .start_stream(h.dispatcher.clone(), Arc::clone(&h.writer));
        h.arbiter.close().await;
        h.arbiter.close().await;
        assert!(h.reader_closed.load(Ordering::SeqCst));
        assert!(!h.arbiter.is_streaming());
    }
}
