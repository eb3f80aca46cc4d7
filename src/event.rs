//! Events emitted by [`ChatClient`](crate::ChatClient) for the presentation layer.
//!
//! The presentation layer only renders these; it never mutates session state
//! directly.

use std::fmt;
use std::sync::Arc;

use crate::directory::RoomDirectory;
use crate::reply_codes::{PendingReply, ReplyCode};

/// Something the presentation layer should render.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The first directory listing arrived; the session is in the lobby.
    Connected,
    /// A new directory snapshot replaced the previous one.
    DirectoryChanged(Arc<RoomDirectory>),
    /// The server answered a create or join request. Failures carry a
    /// specific reason via [`ReplyCode::description`].
    Reply {
        request: PendingReply,
        code: ReplyCode,
    },
    /// The session entered `room` (after a successful create or join).
    RoomEntered { room: String },
    /// The session left `room` and is back in the lobby.
    RoomLeft { room: String },
    /// A chat line to append to the transcript. Lines typed locally are
    /// echoed with `username` set to the session's own name.
    ChatMessage { username: String, text: String },
    /// The session is over. Always the last event on the channel.
    SessionEnded { reason: EndReason },
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The server announced `SERVER_SHUTDOWN`.
    ServerShutdown,
    /// The user quit.
    ClientQuit,
    /// The connection failed.
    Disconnected(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerShutdown => f.write_str("the server has shut down"),
            Self::ClientQuit => f.write_str("client quit"),
            Self::Disconnected(reason) => write!(f, "disconnected: {reason}"),
        }
    }
}
