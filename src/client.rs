//! Async session handle for the Whisperers chat protocol.
//!
//! [`ChatClient`] owns one connection and drives the session state machine.
//! Commands are `&mut self` methods called from one foreground task; while
//! the session is in a room a background stream reader delivers chat lines.
//! Everything the presentation layer should render arrives as a
//! [`ChatEvent`] on the bounded channel returned from [`ChatClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = TcpTransport::connect(DEFAULT_SERVER_ADDR).await?;
//! let (mut client, mut events) =
//!     ChatClient::start(transport, "alice", ChatConfig::default()).await?;
//!
//! let code = client.join_room("lounge", "").await?;
//! if code.is_success() {
//!     client.send_chat("hello").await?;
//! }
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChatEvent::ChatMessage { username, text } => println!("{username}: {text}"),
//!         ChatEvent::SessionEnded { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::arbiter::ReadArbiter;
use crate::directory::RoomDirectory;
use crate::dispatch::{Dispatcher, SharedState};
use crate::error::{ChatError, Result};
use crate::event::{ChatEvent, EndReason};
use crate::protocol::{validate_username, ClientCommand};
use crate::reply_codes::{PendingReply, ReplyCode};
use crate::state::SessionState;
use crate::transport::{Transport, TransportWriter};

/// Address of the reference chat server.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3000";

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_STREAM_READ_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ChatClient`] session.
///
/// # Example
///
/// ```
/// use whisperers_client::client::ChatConfig;
/// use std::time::Duration;
///
/// let config = ChatConfig::default()
///     .with_poll_interval(Duration::from_millis(500))
///     .with_event_channel_capacity(512)
///     .with_notify_server_on_quit(false);
/// assert_eq!(config.poll_interval, Duration::from_millis(500));
/// assert!(!config.notify_server_on_quit);
/// ```
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Period of the lobby tick. [`ChatClient::poll_ticker`] builds an
    /// interval from it.
    ///
    /// Defaults to **1 second**.
    pub poll_interval: Duration,
    /// Bound on a single read by the in-room stream reader. The reader
    /// notices a stop request at least this often.
    ///
    /// Defaults to **1 second**.
    pub stream_read_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) so readers never block. `SessionEnded` is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Bounded wait for the final `DISCONNECT` sent on quit.
    ///
    /// Defaults to **1 second**.
    pub quit_timeout: Duration,
    /// How long [`ChatClient::start`] waits for the first room listing.
    /// `None` waits indefinitely.
    ///
    /// Defaults to **10 seconds**.
    pub handshake_timeout: Option<Duration>,
    /// How long stopping the stream reader (or delivering `SessionEnded`)
    /// may take before the task is aborted.
    ///
    /// Defaults to **2 seconds**.
    pub shutdown_timeout: Duration,
    /// Whether quitting sends `DISCONNECT` to the server. Cleared
    /// automatically once the server is gone.
    ///
    /// Defaults to **true**.
    pub notify_server_on_quit: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_read_timeout: DEFAULT_STREAM_READ_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            quit_timeout: DEFAULT_QUIT_TIMEOUT,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            notify_server_on_quit: true,
        }
    }
}

impl ChatConfig {
    /// Set the lobby tick period.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the bound on a single stream-mode read.
    #[must_use]
    pub fn with_stream_read_timeout(mut self, timeout: Duration) -> Self {
        self.stream_read_timeout = timeout;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the bounded wait for the final `DISCONNECT`.
    #[must_use]
    pub fn with_quit_timeout(mut self, timeout: Duration) -> Self {
        self.quit_timeout = timeout;
        self
    }

    /// Set how long to wait for the first room listing (`None` = forever).
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the timeout for stopping the stream reader.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set whether quitting notifies the server.
    #[must_use]
    pub fn with_notify_server_on_quit(mut self, notify: bool) -> Self {
        self.notify_server_on_quit = notify;
        self
    }
}

// ── ChatClient ──────────────────────────────────────────────────────

/// Session handle for one connection to a chat server.
///
/// Created via [`ChatClient::start`] (or [`ChatClient::connect`] for TCP).
/// Each command checks the session state first and fails with
/// [`ChatError::InvalidState`] without touching the network when it is not
/// legal. Any transport failure terminates the session.
pub struct ChatClient<T: Transport> {
    username: String,
    arbiter: ReadArbiter<T::Reader>,
    /// Separate from the read gate so writes never queue behind a read.
    writer: Arc<Mutex<T::Writer>>,
    dispatcher: Dispatcher,
    config: ChatConfig,
    released: bool,
}

impl<T: Transport> ChatClient<T> {
    /// Start a session over a connected transport.
    ///
    /// Waits (up to [`ChatConfig::handshake_timeout`]) for the server's first
    /// room listing, then enters the lobby. The returned receiver yields
    /// [`ChatEvent`]s until the session ends.
    ///
    /// # Errors
    ///
    /// - [`ChatError::InvalidInput`] if `username` is empty or contains `;`
    ///   or a line break.
    /// - [`ChatError::Timeout`] if no listing arrives in time.
    /// - [`ChatError::InvalidState`] (session ended) if the server shuts down
    ///   during the handshake.
    /// - Any transport error from the first read.
    pub async fn start(
        transport: T,
        username: impl Into<String>,
        config: ChatConfig,
    ) -> Result<(Self, mpsc::Receiver<ChatEvent>)> {
        let username = username.into();
        validate_username(&username)?;

        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ChatEvent>(capacity);
        let shared = Arc::new(SharedState::new(config.notify_server_on_quit));
        let dispatcher = Dispatcher::new(shared, event_tx, config.shutdown_timeout);

        let (reader, writer) = transport.into_split();
        let mut client = Self {
            username,
            arbiter: ReadArbiter::new(
                reader,
                config.stream_read_timeout,
                config.shutdown_timeout,
            ),
            writer: Arc::new(Mutex::new(writer)),
            dispatcher,
            config,
            released: false,
        };

        let handshake_timeout = client.config.handshake_timeout;
        let handshake = match handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, client.await_first_listing())
                .await
                .unwrap_or(Err(ChatError::Timeout)),
            None => client.await_first_listing().await,
        };
        if let Err(e) = handshake {
            warn!("handshake failed: {e}");
            client.release().await;
            return Err(e);
        }

        Ok((client, event_rx))
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Ask the server to create `name` and enter it.
    ///
    /// An empty `password` creates an unlocked room. `capacity` must be in
    /// [`MIN_ROOM_CAPACITY`](crate::protocol::MIN_ROOM_CAPACITY)..=
    /// [`MAX_ROOM_CAPACITY`](crate::protocol::MAX_ROOM_CAPACITY).
    ///
    /// Blocks until the server replies. A failure code is returned as an
    /// ordinary value (the session is back in the lobby); use
    /// [`ReplyCode::into_result`] to treat it as an error.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidState`] outside the lobby,
    /// [`ChatError::InvalidInput`] for bad fields, or a transport error (which
    /// also ends the session).
    pub async fn create_room(
        &mut self,
        name: &str,
        password: &str,
        capacity: u32,
    ) -> Result<ReplyCode> {
        let command = ClientCommand::CreateRoom {
            room: name.to_string(),
            password: password.to_string(),
            max_users: capacity,
            username: self.username.clone(),
        };
        self.request(command, name, PendingReply::Create).await
    }

    /// Ask the server to let this session into `name`.
    ///
    /// Pass an empty `password` for an unlocked room. Failure codes behave as
    /// in [`create_room`](Self::create_room).
    ///
    /// # Errors
    ///
    /// Same as [`create_room`](Self::create_room).
    pub async fn join_room(&mut self, name: &str, password: &str) -> Result<ReplyCode> {
        let command = ClientCommand::JoinRoom {
            room: name.to_string(),
            password: password.to_string(),
            username: self.username.clone(),
        };
        self.request(command, name, PendingReply::Join).await
    }

    /// Send a chat line to the current room.
    ///
    /// The server does not echo lines back to their sender, so the line is
    /// emitted locally as a [`ChatEvent::ChatMessage`] once it is written.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidState`] unless in a room (after a server shutdown
    /// [`ChatError::is_session_ended`] is true and nothing is written),
    /// [`ChatError::InvalidInput`] for empty text or text with `;` or a line
    /// break, or a transport error.
    pub async fn send_chat(&mut self, text: &str) -> Result<()> {
        let state = self.state().await;
        let Some(room) = state.current_room().map(str::to_owned) else {
            return Err(ChatError::InvalidState {
                action: "send_chat",
                state,
            });
        };

        let command = ClientCommand::MessageRoom {
            room,
            text: text.to_string(),
            username: self.username.clone(),
        };
        command.validate()?;
        self.send(&command).await?;

        self.dispatcher.emit(ChatEvent::ChatMessage {
            username: self.username.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    /// Leave the current room and return to the lobby.
    ///
    /// Stops the stream reader, drains data it left unread, then sends
    /// `DISCONNECT_ROOM`. No reply is awaited and the connection stays open.
    /// Once `DISCONNECT_ROOM` is sent, a later [`quit`](Self::quit) no longer
    /// sends `DISCONNECT`.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidState`] unless in a room, or a transport error.
    pub async fn leave_room(&mut self) -> Result<()> {
        let state = self.state().await;
        let Some(room) = state.current_room().map(str::to_owned) else {
            return Err(ChatError::InvalidState {
                action: "leave_room",
                state,
            });
        };

        self.shared()
            .transition("leave_room", SessionState::Leaving { room: room.clone() })
            .await?;
        self.arbiter.stop_stream().await;
        self.drain("leave_room").await?;

        let command = ClientCommand::DisconnectRoom {
            room: room.clone(),
            username: self.username.clone(),
        };
        self.send(&command).await?;
        self.shared().clear_notify_on_close();

        self.shared()
            .transition("leave_room", SessionState::Lobby)
            .await?;
        info!(room = %room, "left room");
        self.dispatcher.emit(ChatEvent::RoomLeft { room });
        Ok(())
    }

    /// One lobby tick: read at most one chunk if one is ready.
    ///
    /// Returns `true` if a chunk was read and applied. In a room the stream
    /// reader owns the connection and the tick does nothing.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidState`] once the session has ended, or a transport
    /// error.
    pub async fn poll_tick(&mut self) -> Result<bool> {
        let state = self.state().await;
        match state {
            SessionState::Lobby => {}
            SessionState::Terminated => {
                return Err(ChatError::InvalidState {
                    action: "poll",
                    state,
                })
            }
            _ => return Ok(false),
        }

        let chunk = match self.arbiter.poll().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Ok(false),
            Err(e) => return Err(self.fail(e).await),
        };

        if self.dispatcher.dispatch(&chunk, None).await.shutdown {
            self.release().await;
        }
        Ok(true)
    }

    /// End the session.
    ///
    /// Leaves the current room first. Sends `DISCONNECT` only if no clean
    /// `DISCONNECT_ROOM` was sent and the server is still there, waiting at
    /// most [`ChatConfig::quit_timeout`].
    /// Closes the connection and emits `SessionEnded`. Calling it again is a
    /// no-op.
    pub async fn quit(&mut self) {
        let state = self.state().await;
        if state.is_terminated() {
            self.release().await;
            return;
        }

        if state.current_room().is_some() {
            if let Err(e) = self.leave_room().await {
                warn!("leaving room during quit failed: {e}");
            }
        }

        if self.shared().notify_on_close() {
            self.notify_quit().await;
        }

        self.dispatcher.terminate(EndReason::ClientQuit).await;
        self.release().await;
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.shared().state().await
    }

    /// Name of the joined room, if any.
    pub async fn current_room(&self) -> Option<String> {
        self.state().await.current_room().map(str::to_owned)
    }

    /// The username fixed for this session.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The latest room directory snapshot.
    pub async fn directory(&self) -> Arc<RoomDirectory> {
        self.shared().directory().await
    }

    /// Whether quitting will still send `DISCONNECT`.
    pub fn send_disconnect_on_close(&self) -> bool {
        self.shared().notify_on_close()
    }

    /// Whether the background stream reader is running.
    pub fn is_streaming(&self) -> bool {
        self.arbiter.is_streaming()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// An interval firing every [`ChatConfig::poll_interval`], for driving
    /// [`poll_tick`](Self::poll_tick). Late ticks are delayed, not bunched.
    pub fn poll_ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn shared(&self) -> &Arc<SharedState> {
        self.dispatcher.shared()
    }

    async fn await_first_listing(&mut self) -> Result<()> {
        loop {
            let chunk = match self.arbiter.read_blocking().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(e) => return Err(e),
            };

            let outcome = self.dispatcher.dispatch(&chunk, None).await;
            if outcome.shutdown {
                return Err(ChatError::InvalidState {
                    action: "connect",
                    state: SessionState::Terminated,
                });
            }
            if outcome.directory_replaced {
                break;
            }
        }

        self.shared()
            .transition("connect", SessionState::Lobby)
            .await?;
        info!(username = %self.username, "connected; in the lobby");
        self.dispatcher.emit(ChatEvent::Connected);
        Ok(())
    }

    /// Send a create/join command and wait for its reply.
    async fn request(
        &mut self,
        command: ClientCommand,
        room: &str,
        pending: PendingReply,
    ) -> Result<ReplyCode> {
        let (action, awaiting) = match pending {
            PendingReply::Create => ("create_room", SessionState::AwaitingCreateReply),
            PendingReply::Join => ("join_room", SessionState::AwaitingJoinReply),
        };

        let state = self.state().await;
        if !state.can_transition_to(&awaiting) {
            return Err(ChatError::InvalidState { action, state });
        }
        command.validate()?;

        self.shared().transition(action, awaiting).await?;
        self.send(&command).await?;
        let code = self.await_reply(action, pending).await?;

        self.dispatcher.emit(ChatEvent::Reply {
            request: pending,
            code,
        });

        if code.is_success() {
            self.shared()
                .transition(
                    action,
                    SessionState::InRoom {
                        room: room.to_string(),
                    },
                )
                .await?;
            info!(room = %room, "entered room");
            self.dispatcher.emit(ChatEvent::RoomEntered {
                room: room.to_string(),
            });
            self.arbiter
                .start_stream(self.dispatcher.clone(), Arc::clone(&self.writer));
        } else {
            self.shared()
                .transition(action, SessionState::Lobby)
                .await?;
            info!(room = %room, "{pending} refused: {code}");
        }

        Ok(code)
    }

    /// Blocking reads until the pending reply shows up.
    ///
    /// Other traffic read meanwhile (directory updates from other clients) is
    /// applied as usual.
    async fn await_reply(&mut self, action: &'static str, pending: PendingReply) -> Result<ReplyCode> {
        loop {
            let chunk = match self.arbiter.read_blocking().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(e) => return Err(self.fail(e).await),
            };

            let outcome = self.dispatcher.dispatch(&chunk, Some(pending)).await;
            if outcome.shutdown {
                self.release().await;
                return Err(ChatError::InvalidState {
                    action,
                    state: SessionState::Terminated,
                });
            }
            if let Some(code) = outcome.reply {
                return Ok(code);
            }
        }
    }

    /// Apply whatever is already readable. Used after the stream reader
    /// stops so nothing it left behind is lost.
    async fn drain(&mut self, action: &'static str) -> Result<()> {
        loop {
            let chunk = match self.arbiter.poll().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(e).await),
            };

            if self.dispatcher.dispatch(&chunk, None).await.shutdown {
                self.release().await;
                return Err(ChatError::InvalidState {
                    action,
                    state: SessionState::Terminated,
                });
            }
        }
    }

    async fn send(&mut self, command: &ClientCommand) -> Result<()> {
        debug!(command = command.name(), "sending command");
        let sent = self.writer.lock().await.send(&command.to_wire()).await;
        match sent {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn notify_quit(&mut self) {
        let wire = ClientCommand::Disconnect.to_wire();
        let writer = Arc::clone(&self.writer);
        let notify = async move { writer.lock().await.send(&wire).await };

        match tokio::time::timeout(self.config.quit_timeout, notify).await {
            Ok(Ok(())) => debug!("server notified of quit"),
            Ok(Err(e)) => warn!("could not notify server of quit: {e}"),
            Err(_) => warn!("notifying server of quit timed out"),
        }
    }

    /// A transport failure: terminate the session and hand the error back.
    async fn fail(&mut self, error: ChatError) -> ChatError {
        error!("transport failure: {error}");
        self.dispatcher
            .terminate(EndReason::Disconnected(error.to_string()))
            .await;
        self.release().await;
        error
    }

    /// Stop all reads and close both halves. Idempotent.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.arbiter.close().await;
        if let Err(e) = self.writer.lock().await.close().await {
            debug!("closing write half failed: {e}");
        }
        debug!("connection released");
    }
}

#[cfg(feature = "transport-tcp")]
impl ChatClient<crate::transports::TcpTransport> {
    /// Open a TCP connection to `addr` and start a session on it.
    ///
    /// The connection attempt shares [`ChatConfig::handshake_timeout`].
    ///
    /// # Errors
    ///
    /// [`ChatError::Connect`] if no server is reachable, otherwise as
    /// [`start`](Self::start).
    pub async fn connect(
        addr: &str,
        username: impl Into<String>,
        config: ChatConfig,
    ) -> Result<(Self, mpsc::Receiver<ChatEvent>)> {
        use crate::transports::TcpTransport;

        let transport = match config.handshake_timeout {
            Some(limit) => TcpTransport::connect_with_timeout(addr, limit).await?,
            None => TcpTransport::connect(addr).await?,
        };
        Self::start(transport, username, config).await
    }
}

impl<T: Transport> std::fmt::Debug for ChatClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("username", &self.username)
            .field("streaming", &self.is_streaming())
            .field("released", &self.released)
            .finish()
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
    use crate::transport::TransportReader;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Transport that replays a fixed script of chunks.
    ///
    /// Once the script is exhausted, timed reads report a timeout and
    /// blocking reads report a closed connection so tests never hang.
    struct ScriptedTransport {
        script: VecDeque<&'static str>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    struct ScriptedReader {
        script: VecDeque<&'static str>,
    }

    struct LogWriter {
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl TransportReader for ScriptedReader {
        async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
            match (self.script.pop_front(), timeout) {
                (Some(chunk), _) => Ok(Some(chunk.to_string())),
                (None, Some(limit)) => {
                    tokio::time::sleep(limit).await;
                    Ok(None)
                }
                (None, None) => Err(ChatError::TransportClosed),
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TransportWriter for LogWriter {
        async fn send(&mut self, message: &str) -> Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {
        type Reader = ScriptedReader;
        type Writer = LogWriter;

        fn into_split(self) -> (ScriptedReader, LogWriter) {
            (
                ScriptedReader {
                    script: self.script,
                },
                LogWriter { sent: self.sent },
            )
        }
    }

    fn scripted(chunks: &[&'static str]) -> (ScriptedTransport, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        (
            ScriptedTransport {
                script: chunks.iter().copied().collect(),
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }

    fn fast_config() -> ChatConfig {
        ChatConfig::default()
            .with_stream_read_timeout(Duration::from_millis(10))
            .with_handshake_timeout(Some(Duration::from_secs(1)))
    }

    // ── Config tests ────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.stream_read_timeout, Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.quit_timeout, Duration::from_secs(1));
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(10)));
        assert!(config.notify_server_on_quit);
    }

    #[test]
    fn event_channel_capacity_is_clamped() {
        let config = ChatConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn start_enters_lobby_after_first_listing() {
        let (transport, _sent) = scripted(&["lounge;;1;4\n"]);
        let (client, mut events) = ChatClient::start(transport, "alice", fast_config())
            .await
            .unwrap();

        assert_eq!(client.state().await, SessionState::Lobby);
        assert_eq!(client.directory().await.len(), 1);
        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::DirectoryChanged(_))
        ));
        assert!(matches!(events.recv().await, Some(ChatEvent::Connected)));
    }

    #[tokio::test]
    async fn start_rejects_bad_username_before_reading() {
        let (transport, sent) = scripted(&["NO_ROOMS"]);
        let err = ChatClient::start(transport, "a;b", fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_fails_if_connection_drops_before_listing() {
        let (transport, _sent) = scripted(&[]);
        let err = ChatClient::start(transport, "alice", fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::TransportClosed));
    }

    #[tokio::test]
    async fn create_success_enters_room_and_streams() {
        let (transport, sent) = scripted(&["NO_ROOMS", "CREATE_SUCCESS"]);
        let (mut client, _events) = ChatClient::start(transport, "alice", fast_config())
            .await
            .unwrap();

        let code = client.create_room("den", "pw", 3).await.unwrap();
        assert_eq!(code, ReplyCode::CreateSuccess);
        assert_eq!(client.current_room().await.as_deref(), Some("den"));
        assert!(client.is_streaming());
        assert_eq!(
            sent.lock().unwrap().as_slice(),
            ["CREATE_ROOM;den;pw;1;3;alice"]
        );

        client.quit().await;
    }

    #[tokio::test]
    async fn wrong_password_returns_to_lobby() {
        let (transport, _sent) = scripted(&["NO_ROOMS", "INVALID_PASSWORD"]);
        let (mut client, _events) = ChatClient::start(transport, "bob", fast_config())
            .await
            .unwrap();

        let code = client.join_room("den", "nope").await.unwrap();
        assert_eq!(code, ReplyCode::InvalidPassword);
        assert!(matches!(code.into_result(), Err(ChatError::Rejected(_))));
        assert_eq!(client.state().await, SessionState::Lobby);
        assert!(!client.is_streaming());
    }

    #[tokio::test]
    async fn invalid_capacity_sends_nothing() {
        let (transport, sent) = scripted(&["NO_ROOMS"]);
        let (mut client, _events) = ChatClient::start(transport, "bob", fast_config())
            .await
            .unwrap();

        let err = client.create_room("den", "", 9).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert_eq!(client.state().await, SessionState::Lobby);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_outside_a_room_is_invalid_state() {
        let (transport, sent) = scripted(&["NO_ROOMS"]);
        let (mut client, _events) = ChatClient::start(transport, "bob", fast_config())
            .await
            .unwrap();

        let err = client.send_chat("hi").await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::InvalidState {
                action: "send_chat",
                state: SessionState::Lobby
            }
        ));
        assert!(!err.is_session_ended());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quit_from_lobby_sends_disconnect_once() {
        let (transport, sent) = scripted(&["NO_ROOMS"]);
        let (mut client, _events) = ChatClient::start(transport, "bob", fast_config())
            .await
            .unwrap();

        client.quit().await;
        client.quit().await;

        assert_eq!(sent.lock().unwrap().as_slice(), ["DISCONNECT"]);
        assert!(client.state().await.is_terminated());
        assert!(!client.send_disconnect_on_close());
    }

    #[tokio::test]
    async fn quit_without_notification_sends_nothing() {
        let (transport, sent) = scripted(&["NO_ROOMS"]);
        let config = fast_config().with_notify_server_on_quit(false);
        let (mut client, _events) = ChatClient::start(transport, "bob", config)
            .await
            .unwrap();

        client.quit().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn debug_impl_names_the_user() {
        let (transport, _sent) = scripted(&["NO_ROOMS"]);
        let (client, _events) = ChatClient::start(transport, "carol", fast_config())
            .await
            .unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("ChatClient"));
        assert!(debug.contains("carol"));
    }
}
