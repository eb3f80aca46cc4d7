//! # Whisperers Client
//!
//! Async session and protocol engine for the Whisperers room-based chat
//! service.
//!
//! The server speaks a semicolon-delimited text protocol over a single TCP
//! connection. This crate owns that connection, sorts the interleaved
//! messages arriving on it, and drives the connection/room lifecycle. It
//! never lets two readers race on the socket: the lobby is polled from the
//! foreground, while rooms are served by a background stream reader, and
//! both go through one single-reader gate.
//!
//! ## Features
//!
//! - **Explicit state machine**: [`SessionState`] rejects commands issued in
//!   the wrong state before anything reaches the server
//! - **Pluggable transport**: implement [`Transport`] for any backend;
//!   `transport-tcp` (default) provides [`TcpTransport`]
//! - **Event-driven**: render [`ChatEvent`]s received on a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use whisperers_client::{ChatClient, ChatConfig, ChatEvent, DEFAULT_SERVER_ADDR};
//!
//! # async fn run() -> Result<(), whisperers_client::ChatError> {
//! let (mut client, mut events) =
//!     ChatClient::connect(DEFAULT_SERVER_ADDR, "alice", ChatConfig::default()).await?;
//!
//! for room in client.directory().await.iter() {
//!     println!("{} ({}/{})", room.name, room.current_users, room.max_users);
//! }
//!
//! if client.join_room("lounge", "").await?.is_success() {
//!     client.send_chat("hello everyone").await?;
//! }
//!
//! while let Some(event) = events.recv().await {
//!     if let ChatEvent::ChatMessage { username, text } = event {
//!         println!("{username}: {text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod arbiter;
pub mod client;
pub mod directory;
mod dispatch;
pub mod error;
pub mod event;
pub mod protocol;
pub mod reply_codes;
pub mod state;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ChatClient, ChatConfig, DEFAULT_SERVER_ADDR};
pub use directory::{RoomDirectory, RoomSummary};
pub use error::{ChatError, MalformedPayload};
pub use event::{ChatEvent, EndReason};
pub use protocol::{demultiplex, ClientCommand, InboundEvent};
pub use reply_codes::{PendingReply, ReplyCode};
pub use state::{ReadMode, SessionState};
pub use transport::{Transport, TransportReader, TransportWriter};

#[cfg(feature = "transport-tcp")]
pub use transports::{StreamTransport, TcpTransport};
