//! Error types for the Whisperers chat client.

use thiserror::Error;

use crate::reply_codes::ReplyCode;
use crate::state::SessionState;

/// Errors that can occur when using the chat client.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No server could be reached when opening the transport.
    #[error("could not connect to chat server: {0}")]
    Connect(#[source] std::io::Error),

    /// Failed to send a command through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive data from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed, either locally or by the server.
    #[error("transport connection closed")]
    TransportClosed,

    /// The action is not legal in the current session state. Rejected before
    /// any network I/O.
    #[error("{}", invalid_state_message(.action, .state))]
    InvalidState {
        /// The rejected action, e.g. `"send_chat"`.
        action: &'static str,
        /// The state the session was in when the action was attempted.
        state: SessionState,
    },

    /// The server answered a create/join request with a failure code.
    #[error("request rejected by server: {0}")]
    Rejected(ReplyCode),

    /// A server payload (or part of one) could not be parsed and was dropped.
    #[error("malformed payload: {0}")]
    Malformed(#[from] MalformedPayload),

    /// A command field would corrupt the wire format or is out of range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Returns `true` if this error reports an action attempted after the
    /// session terminated (server shutdown, disconnect or quit).
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            Self::InvalidState {
                state: SessionState::Terminated,
                ..
            }
        )
    }

    /// Returns `true` for errors that mean the connection to the server is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::TransportSend(_) | Self::TransportReceive(_) | Self::TransportClosed | Self::Io(_)
        )
    }
}

fn invalid_state_message(action: &str, state: &SessionState) -> String {
    match state {
        SessionState::Terminated => format!("session ended: cannot {action}"),
        other => format!("cannot {action} while {other}"),
    }
}

/// A unit of server data that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedPayload {
    /// A listing line did not have exactly four `;`-separated fields.
    #[error("listing line {line:?} has {fields} fields, expected 4")]
    FieldCount {
        /// The offending line.
        line: String,
        /// Number of fields found.
        fields: usize,
    },

    /// A listing line carried a non-numeric user count.
    #[error("listing line {line:?} has a non-numeric user count")]
    UserCount {
        /// The offending line.
        line: String,
    },

    /// A chat delivery was missing the `username;text` separator.
    #[error("chat payload {0:?} has no username separator")]
    ChatPayload(String),
}

/// A specialized [`Result`] type for chat client operations.
pub type Result<T> = std::result::Result<T, ChatError>;
