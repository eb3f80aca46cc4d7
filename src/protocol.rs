//! Wire format of the chat protocol.
//!
//! Every message is a line of `;`-separated fields sent as raw text over the
//! TCP stream. The stream carries no length prefix, so one read may contain
//! several server messages glued together, or only part of one. The
//! [`demultiplex`] function classifies each read ("chunk") with the same
//! prefix heuristics the server's other clients rely on:
//!
//! 1. `SERVER_SHUTDOWN` on its own is a shutdown notice.
//! 2. A chunk whose first field is `UPDATE_DATA` is a directory refresh.
//! 3. A chunk starting with `Server;` that is not a listing row is a join or
//!    leave notice, delivered as chat from `Server`.
//! 4. A chunk containing `MESSAGE;` carries chat deliveries, possibly followed
//!    by an embedded `UPDATE_DATA` refresh.
//! 5. A bare reply literal answers the pending create/join request.
//! 6. Anything else is a full directory listing.

use std::fmt;

use tracing::warn;

use crate::directory::{RoomDirectory, RoomSummary};
use crate::error::{ChatError, MalformedPayload, Result};
use crate::reply_codes::{PendingReply, ReplyCode};

/// Field delimiter.
pub const DELIMITER: char = ';';

/// Sent by the server right before it stops.
pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN";

/// Prefix of an unsolicited directory refresh.
pub const UPDATE_DATA: &str = "UPDATE_DATA";

/// Sender name on the server's own join/leave notices.
pub const SERVER_SENDER: &str = "Server";

/// Marker preceding a `username;text` chat delivery.
pub const MESSAGE_MARKER: &str = "MESSAGE;";

/// Placeholder the server expects when joining without a password.
pub const NO_PASSWORD: &str = "NO_PASSWORD";

/// Smallest room capacity the client will ask for.
pub const MIN_ROOM_CAPACITY: u32 = 2;

/// Largest room capacity the client will ask for.
pub const MAX_ROOM_CAPACITY: u32 = 5;

// ── Client → server ─────────────────────────────────────────────────

/// A command sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `CREATE_ROOM;<room>;<password-or-empty>;1;<maxUsers>;<username>`
    CreateRoom {
        room: String,
        /// Empty for an unlocked room.
        password: String,
        max_users: u32,
        username: String,
    },
    /// `JOIN_ROOM;<room>;<password-or-NO_PASSWORD>;<username>`
    JoinRoom {
        room: String,
        /// Empty when the room is unlocked.
        password: String,
        username: String,
    },
    /// `MESSAGE_ROOM;<room>;<text>;<username>`
    MessageRoom {
        room: String,
        text: String,
        username: String,
    },
    /// `DISCONNECT_ROOM;<room>;<username>`
    DisconnectRoom { room: String, username: String },
    /// `DISCONNECT`
    Disconnect,
}

impl ClientCommand {
    /// Serialize the command into its wire form.
    pub fn to_wire(&self) -> String {
        match self {
            Self::CreateRoom {
                room,
                password,
                max_users,
                username,
            } => format!("CREATE_ROOM;{room};{password};1;{max_users};{username}"),
            Self::JoinRoom {
                room,
                password,
                username,
            } => {
                let password = if password.is_empty() {
                    NO_PASSWORD
                } else {
                    password.as_str()
                };
                format!("JOIN_ROOM;{room};{password};{username}")
            }
            Self::MessageRoom {
                room,
                text,
                username,
            } => format!("MESSAGE_ROOM;{room};{text};{username}"),
            Self::DisconnectRoom { room, username } => {
                format!("DISCONNECT_ROOM;{room};{username}")
            }
            Self::Disconnect => "DISCONNECT".to_string(),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "CREATE_ROOM",
            Self::JoinRoom { .. } => "JOIN_ROOM",
            Self::MessageRoom { .. } => "MESSAGE_ROOM",
            Self::DisconnectRoom { .. } => "DISCONNECT_ROOM",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// Check that no field would break the framing.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidInput`] when a required field is empty,
    /// a field contains `;` or a line break, or the capacity is outside
    /// [`MIN_ROOM_CAPACITY`]..=[`MAX_ROOM_CAPACITY`].
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::CreateRoom {
                room,
                password,
                max_users,
                username,
            } => {
                required_field("room name", room)?;
                optional_field("password", password)?;
                required_field("username", username)?;
                if !(MIN_ROOM_CAPACITY..=MAX_ROOM_CAPACITY).contains(max_users) {
                    return Err(ChatError::InvalidInput(format!(
                        "room capacity must be between {MIN_ROOM_CAPACITY} and {MAX_ROOM_CAPACITY}, got {max_users}"
                    )));
                }
                Ok(())
            }
            Self::JoinRoom {
                room,
                password,
                username,
            } => {
                required_field("room name", room)?;
                optional_field("password", password)?;
                required_field("username", username)
            }
            Self::MessageRoom {
                room,
                text,
                username,
            } => {
                required_field("room name", room)?;
                required_field("message", text)?;
                required_field("username", username)
            }
            Self::DisconnectRoom { room, username } => {
                required_field("room name", room)?;
                required_field("username", username)
            }
            Self::Disconnect => Ok(()),
        }
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validate a username once at connect time.
pub(crate) fn validate_username(username: &str) -> Result<()> {
    required_field("username", username)
}

fn required_field(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ChatError::InvalidInput(format!("{label} must not be empty")));
    }
    optional_field(label, value)
}

fn optional_field(label: &str, value: &str) -> Result<()> {
    if value.contains([DELIMITER, '\n', '\r']) {
        return Err(ChatError::InvalidInput(format!(
            "{label} must not contain ';' or line breaks"
        )));
    }
    Ok(())
}

// ── Server → client ─────────────────────────────────────────────────

/// One unit of server traffic, classified by [`demultiplex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A full directory snapshot (`NO_ROOMS`, empty, or listing lines).
    RoomListing(String),
    /// Answer to a pending `CREATE_ROOM`.
    CreateReply(ReplyCode),
    /// Answer to a pending `JOIN_ROOM`.
    JoinReply(ReplyCode),
    /// A chat line from another room member.
    ChatMessage { username: String, text: String },
    /// An unsolicited directory snapshot (the text after `UPDATE_DATA;`).
    RoomUpdate(String),
    /// The server is terminating.
    ServerShutdown,
    /// A unit that could not be classified or parsed.
    Unrecognized(String),
}

impl InboundEvent {
    fn reply(pending: PendingReply, code: ReplyCode) -> Self {
        match pending {
            PendingReply::Create => Self::CreateReply(code),
            PendingReply::Join => Self::JoinReply(code),
        }
    }
}

/// Split one received chunk into protocol events.
///
/// `pending` names the create/join request still waiting for its reply, if
/// any. Replies are not self-describing, so a reply literal is only reported
/// as a reply while a request is pending. While a request is pending, a chunk
/// that is neither a recognised push nor a clean listing is the server's
/// "other" reply and resolves to [`ReplyCode::OtherFailure`]. A reply literal
/// glued as the last line of a listing or update is split off and reported
/// after it.
///
/// A listing or update with no usable row but at least one malformed line is
/// reported as [`InboundEvent::Unrecognized`] rather than as an empty
/// directory.
///
/// Events are returned in the order they appear in the chunk.
pub fn demultiplex(chunk: &str, pending: Option<PendingReply>) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    for event in classify(chunk, pending) {
        settle_snapshot(event, pending, &mut events);
    }
    events
}

fn classify(chunk: &str, pending: Option<PendingReply>) -> Vec<InboundEvent> {
    let trimmed = chunk.trim();

    if trimmed == SERVER_SHUTDOWN {
        return vec![InboundEvent::ServerShutdown];
    }

    if let Some(rest) = strip_update_prefix(chunk) {
        return split_update(rest);
    }

    if let Some(events) = split_notice(chunk) {
        return events;
    }

    if chunk.contains(MESSAGE_MARKER) {
        return split_chat(chunk);
    }

    if ReplyCode::from_wire(trimmed).is_some() {
        return match pending {
            Some(pending) => vec![InboundEvent::reply(
                pending,
                ReplyCode::resolve(pending, trimmed),
            )],
            None => {
                warn!("reply {trimmed:?} received with no request pending");
                vec![InboundEvent::Unrecognized(chunk.to_string())]
            }
        };
    }

    if let Some(pending) = pending {
        let parsed = RoomDirectory::parse(chunk);
        let unclean = parsed.directory.is_empty() || !parsed.rejected.is_empty();
        if unclean && split_trailing_reply(chunk).is_none() {
            warn!("unrecognised {pending} reply: {trimmed:?}");
            return vec![InboundEvent::reply(pending, ReplyCode::OtherFailure)];
        }
    }

    vec![InboundEvent::RoomListing(chunk.to_string())]
}

/// Final pass over listings and updates: split off a glued reply and demote
/// snapshots that hold nothing but malformed lines.
fn settle_snapshot(
    event: InboundEvent,
    pending: Option<PendingReply>,
    out: &mut Vec<InboundEvent>,
) {
    type Wrap = fn(String) -> InboundEvent;
    let (mut text, wrap) = match event {
        InboundEvent::RoomListing(text) => (text, InboundEvent::RoomListing as Wrap),
        InboundEvent::RoomUpdate(text) => (text, InboundEvent::RoomUpdate as Wrap),
        other => {
            out.push(other);
            return;
        }
    };

    let mut reply = None;
    if let Some(pending) = pending {
        if let Some((head, token)) = split_trailing_reply(&text) {
            reply = Some(InboundEvent::reply(
                pending,
                ReplyCode::resolve(pending, token),
            ));
            text = head.to_string();
        }
    }

    let parsed = RoomDirectory::parse(&text);
    if parsed.directory.is_empty() && !parsed.rejected.is_empty() {
        warn!("not a room listing: {:?}", text.trim());
        out.push(InboundEvent::Unrecognized(text));
    } else {
        out.push(wrap(text));
    }
    out.extend(reply);
}

/// Splits `text` into the lines before its last line and that last line, if
/// the last line is a bare reply literal.
fn split_trailing_reply(text: &str) -> Option<(&str, &str)> {
    let (head, last) = text.trim_end().rsplit_once('\n')?;
    let last = last.trim();
    ReplyCode::from_wire(last).map(|_| (head, last))
}

/// A join/leave notice (`Server;<text>`) is sent without the `MESSAGE;`
/// marker. A first line that parses as a listing row is a room named
/// `Server`, not a notice.
fn split_notice(chunk: &str) -> Option<Vec<InboundEvent>> {
    let body = chunk.trim_start();
    let rest = body
        .strip_prefix(SERVER_SENDER)?
        .strip_prefix(DELIMITER)?;
    let first_line = body.lines().next().unwrap_or_default();
    if RoomSummary::parse_line(first_line).is_ok() {
        return None;
    }

    let end = [rest.find(MESSAGE_MARKER), rest.find(UPDATE_DATA)]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(rest.len());
    let (text, tail) = rest.split_at(end);

    let mut events = vec![InboundEvent::ChatMessage {
        username: SERVER_SENDER.to_string(),
        text: text.trim_end().to_string(),
    }];
    if let Some(update) = strip_update_prefix(tail) {
        events.extend(split_update(update));
    } else if !tail.is_empty() {
        events.extend(split_chat(tail));
    }
    Some(events)
}

/// Returns the text after a leading `UPDATE_DATA` field, if the chunk starts
/// with one.
fn strip_update_prefix(chunk: &str) -> Option<&str> {
    let rest = chunk.trim_start().strip_prefix(UPDATE_DATA)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix(DELIMITER)
}

/// A refresh glued to a following chat delivery is split so the chat line is
/// not lost inside the listing.
fn split_update(rest: &str) -> Vec<InboundEvent> {
    match rest.find(MESSAGE_MARKER) {
        Some(idx) => {
            let (update, chat) = rest.split_at(idx);
            let mut events = vec![InboundEvent::RoomUpdate(update.to_string())];
            events.extend(split_chat(chat));
            events
        }
        None => vec![InboundEvent::RoomUpdate(rest.to_string())],
    }
}

fn split_chat(chunk: &str) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    let mut segments = chunk.split(MESSAGE_MARKER);
    // Anything before the first marker is noise from an earlier, partial read.
    segments.next();

    for segment in segments {
        let (payload, update) = match segment.split_once(UPDATE_DATA) {
            Some((payload, update)) => (
                payload.strip_suffix(DELIMITER).unwrap_or(payload),
                Some(update.strip_prefix(DELIMITER).unwrap_or(update)),
            ),
            None => (segment, None),
        };

        match parse_chat_payload(payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!("dropping chat delivery: {e}");
                events.push(InboundEvent::Unrecognized(payload.to_string()));
            }
        }

        if let Some(update) = update {
            events.push(InboundEvent::RoomUpdate(update.to_string()));
        }
    }

    events
}

fn parse_chat_payload(payload: &str) -> std::result::Result<InboundEvent, MalformedPayload> {
    let (username, text) = payload
        .split_once(DELIMITER)
        .ok_or_else(|| MalformedPayload::ChatPayload(payload.to_string()))?;
    Ok(InboundEvent::ChatMessage {
        username: username.to_string(),
        text: text.to_string(),
    })
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

    fn chat(username: &str, text: &str) -> InboundEvent {
        InboundEvent::ChatMessage {
            username: username.into(),
            text: text.into(),
        }
    }

    #[test]
    fn shutdown_takes_precedence() {
        assert_eq!(
            demultiplex("SERVER_SHUTDOWN", None),
            vec![InboundEvent::ServerShutdown]
        );
        assert_eq!(
            demultiplex("SERVER_SHUTDOWN", Some(PendingReply::Join)),
            vec![InboundEvent::ServerShutdown]
        );
    }

    #[test]
    fn update_chunk_is_a_single_room_update() {
        assert_eq!(
            demultiplex("UPDATE_DATA;A;pw;1;4", None),
            vec![InboundEvent::RoomUpdate("A;pw;1;4".into())]
        );
    }

    #[test]
    fn bare_update_prefix_means_empty_directory() {
        assert_eq!(
            demultiplex("UPDATE_DATA;", None),
            vec![InboundEvent::RoomUpdate(String::new())]
        );
        assert_eq!(
            demultiplex("UPDATE_DATA", None),
            vec![InboundEvent::RoomUpdate(String::new())]
        );
    }

    #[test]
    fn room_named_like_prefix_is_not_an_update() {
        let events = demultiplex("UPDATE_DATAROOM;;1;4", None);
        assert_eq!(
            events,
            vec![InboundEvent::RoomListing("UPDATE_DATAROOM;;1;4".into())]
        );
    }

    #[test]
    fn chat_with_bundled_update_yields_two_events_in_order() {
        assert_eq!(
            demultiplex("MESSAGE;alice;hi;UPDATE_DATA;B;;0;3", None),
            vec![chat("alice", "hi"), InboundEvent::RoomUpdate("B;;0;3".into())]
        );
    }

    #[test]
    fn glued_chat_messages_each_yield_an_event() {
        assert_eq!(
            demultiplex("MESSAGE;alice;hiMESSAGE;bob;hey there", None),
            vec![chat("alice", "hi"), chat("bob", "hey there")]
        );
    }

    #[test]
    fn text_before_marker_is_ignored() {
        assert_eq!(
            demultiplex("ialMESSAGE;carol;back", None),
            vec![chat("carol", "back")]
        );
    }

    #[test]
    fn update_followed_by_chat_keeps_both() {
        assert_eq!(
            demultiplex("UPDATE_DATA;A;;1;4\nMESSAGE;bob;yo", None),
            vec![
                InboundEvent::RoomUpdate("A;;1;4\n".into()),
                chat("bob", "yo")
            ]
        );
    }

    #[test]
    fn chat_without_separator_is_unrecognized() {
        assert_eq!(
            demultiplex("MESSAGE;nobody", None),
            vec![InboundEvent::Unrecognized("nobody".into())]
        );
    }

    #[test]
    fn reply_literal_resolves_against_pending_request() {
        assert_eq!(
            demultiplex("CREATE_SUCCESS", Some(PendingReply::Create)),
            vec![InboundEvent::CreateReply(ReplyCode::CreateSuccess)]
        );
        assert_eq!(
            demultiplex("ROOM_FULL", Some(PendingReply::Join)),
            vec![InboundEvent::JoinReply(ReplyCode::RoomFull)]
        );
    }

    #[test]
    fn reply_literal_without_pending_request_is_unrecognized() {
        assert_eq!(
            demultiplex("JOIN_SUCCESS", None),
            vec![InboundEvent::Unrecognized("JOIN_SUCCESS".into())]
        );
    }

    #[test]
    fn unknown_reply_while_pending_is_other_failure() {
        assert_eq!(
            demultiplex("SOMETHING_ODD", Some(PendingReply::Create)),
            vec![InboundEvent::CreateReply(ReplyCode::OtherFailure)]
        );
    }

    #[test]
    fn clean_listing_while_pending_is_still_a_listing() {
        assert_eq!(
            demultiplex("lounge;;1;4\n", Some(PendingReply::Join)),
            vec![InboundEvent::RoomListing("lounge;;1;4\n".into())]
        );
    }

    #[test]
    fn fallthrough_is_a_listing() {
        assert_eq!(
            demultiplex("NO_ROOMS", None),
            vec![InboundEvent::RoomListing("NO_ROOMS".into())]
        );
        assert_eq!(
            demultiplex("a;;0;2\nb;x;1;3\n", None),
            vec![InboundEvent::RoomListing("a;;0;2\nb;x;1;3\n".into())]
        );
    }

    #[test]
    fn server_notice_is_chat_from_server() {
        assert_eq!(
            demultiplex("Server;bob has joined the chatroom.", None),
            vec![chat("Server", "bob has joined the chatroom.")]
        );
        assert_eq!(
            demultiplex("Server;bob has left the chatroom.MESSAGE;carol;bye", None),
            vec![
                chat("Server", "bob has left the chatroom."),
                chat("carol", "bye")
            ]
        );
    }

    #[test]
    fn server_notice_with_trailing_update() {
        assert_eq!(
            demultiplex("Server;bob has joined the chatroom.UPDATE_DATA;lounge;;2;4\n", None),
            vec![
                chat("Server", "bob has joined the chatroom."),
                InboundEvent::RoomUpdate("lounge;;2;4\n".into())
            ]
        );
    }

    #[test]
    fn room_named_server_is_still_a_listing() {
        assert_eq!(
            demultiplex("Server;;1;4\nden;;0;2\n", None),
            vec![InboundEvent::RoomListing("Server;;1;4\nden;;0;2\n".into())]
        );
    }

    #[test]
    fn snapshot_of_only_malformed_lines_is_unrecognized() {
        assert_eq!(
            demultiplex("hello there", None),
            vec![InboundEvent::Unrecognized("hello there".into())]
        );
        assert_eq!(
            demultiplex("UPDATE_DATA;garbage", None),
            vec![InboundEvent::Unrecognized("garbage".into())]
        );
    }

    #[test]
    fn reply_glued_after_update_is_split_off() {
        assert_eq!(
            demultiplex("UPDATE_DATA;x;;1;3\nJOIN_SUCCESS", Some(PendingReply::Join)),
            vec![
                InboundEvent::RoomUpdate("x;;1;3".into()),
                InboundEvent::JoinReply(ReplyCode::JoinSuccess)
            ]
        );
        assert_eq!(
            demultiplex("lounge;;1;4\nROOM_FULL\n", Some(PendingReply::Join)),
            vec![
                InboundEvent::RoomListing("lounge;;1;4".into()),
                InboundEvent::JoinReply(ReplyCode::RoomFull)
            ]
        );
    }

    #[test]
    fn glued_reply_without_pending_request_stays_in_snapshot() {
        assert_eq!(
            demultiplex("UPDATE_DATA;x;;1;3\nJOIN_SUCCESS", None),
            vec![InboundEvent::RoomUpdate("x;;1;3\nJOIN_SUCCESS".into())]
        );
    }

    #[test]
    fn commands_serialize_to_wire_format() {
        let create = ClientCommand::CreateRoom {
            room: "lounge".into(),
            password: String::new(),
            max_users: 4,
            username: "alice".into(),
        };
        assert_eq!(create.to_wire(), "CREATE_ROOM;lounge;;1;4;alice");

        let join = ClientCommand::JoinRoom {
            room: "lounge".into(),
            password: String::new(),
            username: "bob".into(),
        };
        assert_eq!(join.to_wire(), "JOIN_ROOM;lounge;NO_PASSWORD;bob");

        let locked_join = ClientCommand::JoinRoom {
            room: "vault".into(),
            password: "hunter2".into(),
            username: "bob".into(),
        };
        assert_eq!(locked_join.to_wire(), "JOIN_ROOM;vault;hunter2;bob");

        let message = ClientCommand::MessageRoom {
            room: "lounge".into(),
            text: "hello".into(),
            username: "bob".into(),
        };
        assert_eq!(message.to_wire(), "MESSAGE_ROOM;lounge;hello;bob");

        let leave = ClientCommand::DisconnectRoom {
            room: "lounge".into(),
            username: "bob".into(),
        };
        assert_eq!(leave.to_wire(), "DISCONNECT_ROOM;lounge;bob");
        assert_eq!(ClientCommand::Disconnect.to_wire(), "DISCONNECT");
    }

    #[test]
    fn validate_rejects_delimiters_and_bad_capacity() {
        let bad_text = ClientCommand::MessageRoom {
            room: "lounge".into(),
            text: "a;b".into(),
            username: "bob".into(),
        };
        assert!(matches!(
            bad_text.validate(),
            Err(ChatError::InvalidInput(_))
        ));

        let empty_room = ClientCommand::JoinRoom {
            room: " ".into(),
            password: String::new(),
            username: "bob".into(),
        };
        assert!(empty_room.validate().is_err());

        let too_big = ClientCommand::CreateRoom {
            room: "lounge".into(),
            password: String::new(),
            max_users: 9,
            username: "bob".into(),
        };
        assert!(too_big.validate().is_err());

        let ok = ClientCommand::CreateRoom {
            room: "lounge".into(),
            password: "pw".into(),
            max_users: 5,
            username: "bob".into(),
        };
        assert!(ok.validate().is_ok());
    }
}
