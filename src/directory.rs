//! The room directory: every room the server knows about and its occupancy.
//!
//! A directory is always derived from a full snapshot sent by the server and
//! replaced wholesale when the next snapshot arrives. It is never patched.

use serde::{Deserialize, Serialize};

use crate::error::MalformedPayload;

/// Token the server sends instead of a listing when no rooms exist.
pub const NO_ROOMS: &str = "NO_ROOMS";

/// One room as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub name: String,
    /// `true` when the room requires a password to join.
    pub is_locked: bool,
    pub current_users: u32,
    pub max_users: u32,
}

impl RoomSummary {
    /// Whether the room has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.current_users >= self.max_users
    }

    /// Parse one `name;password;current;max` listing line.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPayload`] when the field count is not four or a
    /// user count is not a number.
    pub fn parse_line(line: &str) -> Result<Self, MalformedPayload> {
        let fields: Vec<&str> = line.split(';').collect();
        let [name, password, current, max] = fields.as_slice() else {
            return Err(MalformedPayload::FieldCount {
                line: line.to_string(),
                fields: fields.len(),
            });
        };

        let parse_count = |raw: &str| {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| MalformedPayload::UserCount {
                    line: line.to_string(),
                })
        };

        Ok(Self {
            name: (*name).to_string(),
            is_locked: !password.is_empty(),
            current_users: parse_count(current)?,
            max_users: parse_count(max)?,
        })
    }
}

/// Mapping of room name to [`RoomSummary`], in the order the server listed
/// the rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDirectory {
    rooms: Vec<RoomSummary>,
}

/// Result of parsing a listing payload: the directory built from the good
/// lines and the lines that were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDirectory {
    pub directory: RoomDirectory,
    pub rejected: Vec<MalformedPayload>,
}

impl RoomDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a listing payload.
    ///
    /// `NO_ROOMS` and empty (or whitespace-only) text produce an empty
    /// directory. Malformed lines are skipped and reported in
    /// [`ParsedDirectory::rejected`]; the remaining lines are still used.
    /// A room name listed twice keeps its first position and its latest data.
    pub fn parse(payload: &str) -> ParsedDirectory {
        let mut parsed = ParsedDirectory::default();

        for line in payload.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim() == NO_ROOMS {
                continue;
            }
            match RoomSummary::parse_line(line) {
                Ok(room) => parsed.directory.upsert(room),
                Err(e) => parsed.rejected.push(e),
            }
        }

        parsed
    }

    fn upsert(&mut self, room: RoomSummary) {
        if let Some(existing) = self.rooms.iter_mut().find(|r| r.name == room.name) {
            *existing = room;
        } else {
            self.rooms.push(room);
        }
    }

    /// Look up a room by name.
    pub fn get(&self, name: &str) -> Option<&RoomSummary> {
        self.rooms.iter().find(|r| r.name == name)
    }

    /// Rooms in display order.
    pub fn iter(&self) -> impl Iterator<Item = &RoomSummary> {
        self.rooms.iter()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// `true` when the server reported no rooms ("no rooms" UI state).
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl<'a> IntoIterator for &'a RoomDirectory {
    type Item = &'a RoomSummary;
    type IntoIter = std::slice::Iter<'a, RoomSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.rooms.iter()
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
    fn parses_well_formed_listing() {
        let parsed = RoomDirectory::parse("lounge;;1;4\nvault;secret;2;2\n");
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.directory.len(), 2);

        let names: Vec<&str> = parsed.directory.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["lounge", "vault"]);

        let lounge = parsed.directory.get("lounge").unwrap();
        assert!(!lounge.is_locked);
        assert_eq!((lounge.current_users, lounge.max_users), (1, 4));

        let vault = parsed.directory.get("vault").unwrap();
        assert!(vault.is_locked);
        assert!(vault.is_full());
    }

    #[test]
    fn n_lines_give_n_entries_locked_iff_password() {
        for n in 0..8u32 {
            let payload: String = (0..n)
                .map(|i| {
                    let pw = if i % 2 == 0 { "" } else { "pw" };
                    format!("room{i};{pw};{i};5\n")
                })
                .collect();
            let parsed = RoomDirectory::parse(&payload);
            assert_eq!(parsed.directory.len(), n as usize);
            for (i, room) in parsed.directory.iter().enumerate() {
                assert_eq!(room.is_locked, i % 2 == 1, "room {i}");
            }
        }
    }

    #[test]
    fn no_rooms_and_empty_are_empty_directories() {
        assert!(RoomDirectory::parse(NO_ROOMS).directory.is_empty());
        assert!(RoomDirectory::parse("").directory.is_empty());
        assert!(RoomDirectory::parse("\n").directory.is_empty());
        assert!(RoomDirectory::parse("").rejected.is_empty());
    }

    #[test]
    fn malformed_lines_are_dropped_but_reported() {
        let parsed = RoomDirectory::parse("good;;0;3\nbad;line\nworse;;x;3\nalso-good;p;1;2");
        assert_eq!(parsed.directory.len(), 2);
        assert_eq!(parsed.rejected.len(), 2);
        assert!(matches!(
            parsed.rejected[0],
            MalformedPayload::FieldCount { fields: 2, .. }
        ));
        assert!(matches!(parsed.rejected[1], MalformedPayload::UserCount { .. }));
    }

    #[test]
    fn duplicate_names_keep_first_position() {
        let parsed = RoomDirectory::parse("a;;0;3\nb;;0;3\na;;2;3");
        let names: Vec<&str> = parsed.directory.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(parsed.directory.get("a").unwrap().current_users, 2);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let parsed = RoomDirectory::parse("a;;0;3\r\nb;;1;3\r\n");
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.directory.len(), 2);
    }

    #[test]
    fn directory_serializes_for_presentation_layer() {
        let parsed = RoomDirectory::parse("lounge;;1;4");
        let json = serde_json::to_value(&parsed.directory).unwrap();
        assert_eq!(json["rooms"][0]["name"], "lounge");
        assert_eq!(json["rooms"][0]["is_locked"], false);
    }
}
