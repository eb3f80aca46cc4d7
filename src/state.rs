//! Connection and room lifecycle of a chat session.

use std::fmt;

/// Where the session is in its lifecycle.
///
/// The room name lives inside the variants that have one, so "the current
/// room is set" and "the session is in a room" cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Transport open, waiting for the first directory listing.
    #[default]
    Connecting,
    /// Connected, no room joined. The directory is visible.
    Lobby,
    /// `CREATE_ROOM` sent, reply not yet read.
    AwaitingCreateReply,
    /// `JOIN_ROOM` sent, reply not yet read.
    AwaitingJoinReply,
    /// Member of `room`; chat flows through the stream reader.
    InRoom { room: String },
    /// `DISCONNECT_ROOM` for `room` is being sent.
    Leaving { room: String },
    /// Server shut down, connection lost, or the user quit. Final.
    Terminated,
}

/// The read strategy bound to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Non-blocking reads driven by the foreground tick.
    Poll,
    /// Continuous reads by the background reader task.
    Stream,
    /// No reads at all.
    Closed,
}

impl SessionState {
    /// Name of the joined room, only while in [`SessionState::InRoom`].
    pub fn current_room(&self) -> Option<&str> {
        match self {
            Self::InRoom { room } => Some(room),
            _ => None,
        }
    }

    /// The read strategy that must be active in this state.
    pub fn read_mode(&self) -> ReadMode {
        match self {
            Self::Connecting
            | Self::Lobby
            | Self::AwaitingCreateReply
            | Self::AwaitingJoinReply
            | Self::Leaving { .. } => ReadMode::Poll,
            Self::InRoom { .. } => ReadMode::Stream,
            Self::Terminated => ReadMode::Closed,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Every state may move to `Terminated`; `Terminated` never moves.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Connecting, Lobby) => true,
            (Lobby, AwaitingCreateReply | AwaitingJoinReply) => true,
            (AwaitingCreateReply | AwaitingJoinReply, Lobby | InRoom { .. }) => true,
            (InRoom { room }, Leaving { room: leaving }) => room == leaving,
            (Leaving { .. }, Lobby) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Lobby => f.write_str("in the lobby"),
            Self::AwaitingCreateReply => f.write_str("waiting for a create reply"),
            Self::AwaitingJoinReply => f.write_str("waiting for a join reply"),
            Self::InRoom { room } => write!(f, "in room {room}"),
            Self::Leaving { room } => write!(f, "leaving room {room}"),
            Self::Terminated => f.write_str("terminated"),
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

    fn in_room(name: &str) -> SessionState {
        SessionState::InRoom { room: name.into() }
    }

    #[test]
    fn current_room_only_in_room() {
        assert_eq!(in_room("lounge").current_room(), Some("lounge"));
        assert_eq!(SessionState::Lobby.current_room(), None);
        assert_eq!(
            SessionState::Leaving {
                room: "lounge".into()
            }
            .current_room(),
            None
        );
    }

    #[test]
    fn read_mode_follows_state() {
        assert_eq!(SessionState::Lobby.read_mode(), ReadMode::Poll);
        assert_eq!(SessionState::AwaitingJoinReply.read_mode(), ReadMode::Poll);
        assert_eq!(in_room("x").read_mode(), ReadMode::Stream);
        assert_eq!(SessionState::Terminated.read_mode(), ReadMode::Closed);
    }

    #[test]
    fn legal_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(&Lobby));
        assert!(Lobby.can_transition_to(&AwaitingJoinReply));
        assert!(AwaitingJoinReply.can_transition_to(&in_room("a")));
        assert!(AwaitingCreateReply.can_transition_to(&Lobby));
        assert!(in_room("a").can_transition_to(&Leaving { room: "a".into() }));
        assert!(Leaving { room: "a".into() }.can_transition_to(&Lobby));
        assert!(in_room("a").can_transition_to(&Terminated));
    }

    #[test]
    fn illegal_transitions() {
        use SessionState::*;
        assert!(!Lobby.can_transition_to(&in_room("a")));
        assert!(!in_room("a").can_transition_to(&Lobby));
        assert!(!in_room("a").can_transition_to(&Leaving { room: "b".into() }));
        assert!(!Terminated.can_transition_to(&Lobby));
        assert!(!Terminated.can_transition_to(&Terminated));
    }
}
