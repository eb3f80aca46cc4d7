//! Applies demultiplexed server traffic to the session.
//!
//! Both read paths (the foreground poll/reply reads and the background stream
//! reader) hand every chunk to the same [`Dispatcher`], so a chunk is handled
//! identically no matter which mode read it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::directory::RoomDirectory;
use crate::error::{ChatError, Result};
use crate::event::{ChatEvent, EndReason};
use crate::protocol::{demultiplex, InboundEvent};
use crate::reply_codes::{PendingReply, ReplyCode};
use crate::state::SessionState;

/// State shared between the client handle and the stream reader task.
pub(crate) struct SharedState {
    state: Mutex<SessionState>,
    directory: Mutex<Arc<RoomDirectory>>,
    /// Whether quitting must still send `DISCONNECT`.
    notify_on_close: AtomicBool,
}

impl SharedState {
    pub(crate) fn new(notify_on_close: bool) -> Self {
        Self {
            state: Mutex::new(SessionState::Connecting),
            directory: Mutex::new(Arc::new(RoomDirectory::new())),
            notify_on_close: AtomicBool::new(notify_on_close),
        }
    }

    pub(crate) async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub(crate) async fn directory(&self) -> Arc<RoomDirectory> {
        Arc::clone(&*self.directory.lock().await)
    }

    pub(crate) fn notify_on_close(&self) -> bool {
        self.notify_on_close.load(Ordering::Acquire)
    }

    /// The server already saw a clean disconnect; quitting stays silent.
    pub(crate) fn clear_notify_on_close(&self) {
        self.notify_on_close.store(false, Ordering::Release);
    }

    /// Move to `next` if that is a legal transition from the current state.
    ///
    /// Returns the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidState`] naming `action` and the current
    /// state when the transition is not allowed.
    pub(crate) async fn transition(
        &self,
        action: &'static str,
        next: SessionState,
    ) -> Result<SessionState> {
        let mut state = self.state.lock().await;
        if !state.can_transition_to(&next) {
            return Err(ChatError::InvalidState {
                action,
                state: state.clone(),
            });
        }
        debug!("state: {} -> {}", *state, next);
        Ok(std::mem::replace(&mut *state, next))
    }
}

/// What a dispatched chunk did to the session.
#[derive(Debug, Default)]
pub(crate) struct Dispatched {
    /// Reply to the pending request, if the chunk carried one.
    pub reply: Option<ReplyCode>,
    /// The chunk replaced the room directory.
    pub directory_replaced: bool,
    /// The server announced its shutdown; the session is now terminated.
    pub shutdown: bool,
}

/// Applies inbound events to [`SharedState`] and forwards them as
/// [`ChatEvent`]s.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    shared: Arc<SharedState>,
    event_tx: mpsc::Sender<ChatEvent>,
    /// Upper bound on waiting for room in the event channel for the final
    /// `SessionEnded` event.
    end_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        event_tx: mpsc::Sender<ChatEvent>,
        end_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            event_tx,
            end_timeout,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Demultiplex one chunk and apply its events in order.
    ///
    /// Processing stops at `SERVER_SHUTDOWN`; nothing after it in the chunk
    /// is applied.
    pub(crate) async fn dispatch(&self, chunk: &str, pending: Option<PendingReply>) -> Dispatched {
        let mut outcome = Dispatched::default();

        for event in demultiplex(chunk, pending) {
            match event {
                InboundEvent::RoomListing(text) | InboundEvent::RoomUpdate(text) => {
                    self.replace_directory(&text).await;
                    outcome.directory_replaced = true;
                }
                InboundEvent::CreateReply(code) | InboundEvent::JoinReply(code) => {
                    outcome.reply = Some(code);
                }
                InboundEvent::ChatMessage { username, text } => {
                    self.deliver_chat(username, text).await;
                }
                InboundEvent::ServerShutdown => {
                    info!("server announced shutdown");
                    self.terminate(EndReason::ServerShutdown).await;
                    outcome.shutdown = true;
                    break;
                }
                InboundEvent::Unrecognized(raw) => {
                    debug!("ignoring unrecognised server data: {raw:?}");
                }
            }
        }

        outcome
    }

    async fn replace_directory(&self, payload: &str) {
        let parsed = RoomDirectory::parse(payload);
        for rejected in &parsed.rejected {
            warn!("dropping listing line: {rejected}");
        }

        let directory = Arc::new(parsed.directory);
        *self.shared.directory.lock().await = Arc::clone(&directory);
        debug!("directory replaced: {} room(s)", directory.len());
        self.emit(ChatEvent::DirectoryChanged(directory));
    }

    async fn deliver_chat(&self, username: String, text: String) {
        match &*self.shared.state.lock().await {
            SessionState::InRoom { .. } | SessionState::Leaving { .. } => {}
            other => {
                debug!("dropping chat line from {username} while {other}");
                return;
            }
        }
        self.emit(ChatEvent::ChatMessage { username, text });
    }

    /// Force the session into `Terminated` and emit the final event.
    ///
    /// Returns `false` if the session had already terminated, in which case
    /// nothing is emitted.
    pub(crate) async fn terminate(&self, reason: EndReason) -> bool {
        {
            let mut state = self.shared.state.lock().await;
            if state.is_terminated() {
                return false;
            }
            debug!("state: {} -> {}", *state, SessionState::Terminated);
            *state = SessionState::Terminated;
        }

        // Nothing is sent once the session has ended.
        self.shared.clear_notify_on_close();

        info!("session ended: {reason}");
        // Always the last event; wait (bounded) for room instead of dropping it.
        if let Err(e) = self
            .event_tx
            .send_timeout(ChatEvent::SessionEnded { reason }, self.end_timeout)
            .await
        {
            debug!("could not deliver SessionEnded: {e}");
        }
        true
    }

    /// Emit an event. If the channel is full, log a warning and drop the
    /// event so a slow consumer never stalls a reader.
    pub(crate) fn emit(&self, event: ChatEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
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

    fn dispatcher(state: SessionState) -> (Dispatcher, mpsc::Receiver<ChatEvent>) {
        let shared = Arc::new(SharedState::new(true));
        *shared.state.try_lock().unwrap() = state;
        let (tx, rx) = mpsc::channel(16);
        (
            Dispatcher::new(shared, tx, Duration::from_millis(100)),
            rx,
        )
    }

    #[tokio::test]
    async fn listing_replaces_directory() {
        let (dispatcher, mut events) = dispatcher(SessionState::Lobby);

        let outcome = dispatcher.dispatch("a;;0;3\nb;pw;1;2\n", None).await;
        assert!(outcome.directory_replaced);
        assert_eq!(dispatcher.shared().directory().await.len(), 2);

        let outcome = dispatcher.dispatch("NO_ROOMS", None).await;
        assert!(outcome.directory_replaced);
        assert!(dispatcher.shared().directory().await.is_empty());

        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::DirectoryChanged(d)) if d.len() == 2
        ));
        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::DirectoryChanged(d)) if d.is_empty()
        ));
    }

    #[tokio::test]
    async fn server_notice_in_room_keeps_directory() {
        let (dispatcher, mut events) = dispatcher(SessionState::InRoom { room: "a".into() });
        dispatcher.dispatch("a;;1;3\nb;pw;1;2\n", None).await;
        assert!(matches!(events.recv().await, Some(ChatEvent::DirectoryChanged(_))));

        let outcome = dispatcher
            .dispatch("Server;carol has joined the chatroom.", None)
            .await;

        assert!(!outcome.directory_replaced);
        assert_eq!(dispatcher.shared().directory().await.len(), 2);
        match events.recv().await {
            Some(ChatEvent::ChatMessage { username, text }) => {
                assert_eq!(username, "Server");
                assert_eq!(text, "carol has joined the chatroom.");
            }
            other => panic!("expected the notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn glued_reply_is_reported_after_update() {
        let (dispatcher, mut events) = dispatcher(SessionState::AwaitingJoinReply);

        let outcome = dispatcher
            .dispatch("UPDATE_DATA;x;;1;3\nJOIN_SUCCESS", Some(PendingReply::Join))
            .await;

        assert_eq!(outcome.reply, Some(ReplyCode::JoinSuccess));
        assert!(outcome.directory_replaced);
        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::DirectoryChanged(d)) if d.get("x").is_some()
        ));
    }

    #[tokio::test]
    async fn chat_then_update_are_applied_in_order() {
        let (dispatcher, mut events) = dispatcher(SessionState::InRoom { room: "r".into() });

        dispatcher
            .dispatch("MESSAGE;alice;hi;UPDATE_DATA;B;;0;3", None)
            .await;

        match events.recv().await.unwrap() {
            ChatEvent::ChatMessage { username, text } => {
                assert_eq!(username, "alice");
                assert_eq!(text, "hi");
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            ChatEvent::DirectoryChanged(_)
        ));
        assert!(dispatcher.shared().directory().await.get("B").is_some());
    }

    #[tokio::test]
    async fn chat_in_lobby_is_dropped() {
        let (dispatcher, mut events) = dispatcher(SessionState::Lobby);
        dispatcher.dispatch("MESSAGE;alice;late", None).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_terminates_once() {
        let (dispatcher, mut events) = dispatcher(SessionState::Lobby);

        let outcome = dispatcher.dispatch("SERVER_SHUTDOWN", None).await;
        assert!(outcome.shutdown);
        assert!(dispatcher.shared().state().await.is_terminated());
        assert!(!dispatcher.shared().notify_on_close());

        assert!(!dispatcher.terminate(EndReason::ClientQuit).await);
        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::SessionEnded {
                reason: EndReason::ServerShutdown
            })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_is_reported_not_applied() {
        let (dispatcher, _events) = dispatcher(SessionState::AwaitingJoinReply);
        let outcome = dispatcher
            .dispatch("INVALID_PASSWORD", Some(PendingReply::Join))
            .await;
        assert_eq!(outcome.reply, Some(ReplyCode::InvalidPassword));
        assert_eq!(
            dispatcher.shared().state().await,
            SessionState::AwaitingJoinReply
        );
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let (dispatcher, _events) = dispatcher(SessionState::Lobby);
        let err = dispatcher
            .shared()
            .transition("leave_room", SessionState::Leaving { room: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::InvalidState {
                action: "leave_room",
                state: SessionState::Lobby
            }
        ));
    }
}
