//! Reply codes sent by the chat server in answer to create/join requests.
//!
//! The server answers `CREATE_ROOM` and `JOIN_ROOM` with a single bare token.
//! The token is not self-describing: the same bytes could in principle be a
//! room listing, so a reply is only recognised while a request is pending
//! (see [`PendingReply`]). These codes serialize using `SCREAMING_SNAKE_CASE`
//! to match the wire literals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChatError, Result};

/// Reply codes returned by the chat server.
///
/// Use [`description()`](ReplyCode::description) for a human-readable
/// explanation suitable for a warning dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyCode {
    CreateSuccess,
    JoinSuccess,
    InvalidPassword,
    RoomFull,
    NoRoom,
    ExistingUser,
    OtherFailure,
}

/// Which request a reply is expected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingReply {
    /// A `CREATE_ROOM` command was sent.
    Create,
    /// A `JOIN_ROOM` command was sent.
    Join,
}

impl ReplyCode {
    /// Every code that has its own wire literal.
    pub const LITERALS: [ReplyCode; 6] = [
        Self::CreateSuccess,
        Self::JoinSuccess,
        Self::InvalidPassword,
        Self::RoomFull,
        Self::NoRoom,
        Self::ExistingUser,
    ];

    /// The exact token the server sends for this code.
    ///
    /// `OtherFailure` has no token of its own; it stands for any reply the
    /// client does not recognise.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::CreateSuccess => "CREATE_SUCCESS",
            Self::JoinSuccess => "JOIN_SUCCESS",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::RoomFull => "ROOM_FULL",
            Self::NoRoom => "NO_ROOM",
            Self::ExistingUser => "EXISTING_USER",
            Self::OtherFailure => "OTHER_FAILURE",
        }
    }

    /// Parse an exact reply literal. Returns `None` for anything else.
    pub fn from_wire(token: &str) -> Option<Self> {
        Self::LITERALS
            .into_iter()
            .find(|code| code.as_wire() == token)
    }

    /// Resolve a reply token against the request that is awaiting it.
    ///
    /// A create request only succeeds on `CREATE_SUCCESS` and a join request
    /// only on `JOIN_SUCCESS`. The join failure codes keep their specific
    /// meaning for joins; anything else is `OtherFailure`.
    pub fn resolve(pending: PendingReply, token: &str) -> Self {
        match (pending, Self::from_wire(token)) {
            (PendingReply::Create, Some(Self::CreateSuccess)) => Self::CreateSuccess,
            (PendingReply::Join, Some(Self::JoinSuccess)) => Self::JoinSuccess,
            (
                PendingReply::Join,
                Some(
                    code @ (Self::InvalidPassword
                    | Self::RoomFull
                    | Self::NoRoom
                    | Self::ExistingUser),
                ),
            ) => code,
            _ => Self::OtherFailure,
        }
    }

    /// Whether this code means the request succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::CreateSuccess | Self::JoinSuccess)
    }

    /// Convert a failure code into [`ChatError::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Rejected`] for every code except the two success
    /// codes.
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ChatError::Rejected(self))
        }
    }

    /// Returns a human-readable description of this reply code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateSuccess => "The chatroom was created and you have joined it.",
            Self::JoinSuccess => "You have joined the chatroom.",
            Self::InvalidPassword => {
                "The password is incorrect. Check the password and try again."
            }
            Self::RoomFull => {
                "The chatroom has reached its maximum number of users. Try another room."
            }
            Self::NoRoom => "The chatroom no longer exists. Pick a room from the refreshed list.",
            Self::ExistingUser => {
                "A user with your name is already in this chatroom. Reconnect with a different name."
            }
            Self::OtherFailure => "The server could not complete the request. Please try again.",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl fmt::Display for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Join => f.write_str("join"),
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

    #[test]
    fn every_literal_parses_back() {
        for code in ReplyCode::LITERALS {
            assert_eq!(ReplyCode::from_wire(code.as_wire()), Some(code));
        }
        assert_eq!(ReplyCode::from_wire("OTHER_FAILURE"), None);
        assert_eq!(ReplyCode::from_wire("join_success"), None);
    }

    #[test]
    fn create_reply_only_succeeds_on_create_success() {
        assert_eq!(
            ReplyCode::resolve(PendingReply::Create, "CREATE_SUCCESS"),
            ReplyCode::CreateSuccess
        );
        assert_eq!(
            ReplyCode::resolve(PendingReply::Create, "JOIN_SUCCESS"),
            ReplyCode::OtherFailure
        );
        assert_eq!(
            ReplyCode::resolve(PendingReply::Create, "ROOM_FULL"),
            ReplyCode::OtherFailure
        );
    }

    #[test]
    fn join_reply_keeps_specific_failures() {
        assert_eq!(
            ReplyCode::resolve(PendingReply::Join, "ROOM_FULL"),
            ReplyCode::RoomFull
        );
        assert_eq!(
            ReplyCode::resolve(PendingReply::Join, "EXISTING_USER"),
            ReplyCode::ExistingUser
        );
        assert_eq!(
            ReplyCode::resolve(PendingReply::Join, "CREATE_SUCCESS"),
            ReplyCode::OtherFailure
        );
        assert_eq!(
            ReplyCode::resolve(PendingReply::Join, "garbage"),
            ReplyCode::OtherFailure
        );
    }

    #[test]
    fn into_result_maps_failures_to_rejected() {
        assert!(ReplyCode::JoinSuccess.into_result().is_ok());
        let err = ReplyCode::InvalidPassword.into_result().unwrap_err();
        assert!(matches!(err, ChatError::Rejected(ReplyCode::InvalidPassword)));
    }

    #[test]
    fn serde_uses_wire_spelling() {
        let json = serde_json::to_string(&ReplyCode::ExistingUser).unwrap();
        assert_eq!(json, "\"EXISTING_USER\"");
        let back: ReplyCode = serde_json::from_str("\"NO_ROOM\"").unwrap();
        assert_eq!(back, ReplyCode::NoRoom);
    }

    #[test]
    fn descriptions_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for code in ReplyCode::LITERALS {
            assert!(seen.insert(code.description()));
        }
        assert!(seen.insert(ReplyCode::OtherFailure.description()));
    }
}
