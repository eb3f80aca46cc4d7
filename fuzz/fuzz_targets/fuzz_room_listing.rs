#![no_main]

use libfuzzer_sys::fuzz_target;
use whisperers_client::RoomDirectory;

fuzz_target!(|data: &[u8]| {
    if let Ok(payload) = std::str::from_utf8(data) {
        let parsed = RoomDirectory::parse(payload);

        // Every non-blank line is either a room or a rejection.
        let lines = payload
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty() && l.trim() != "NO_ROOMS")
            .count();
        assert!(parsed.directory.len() + parsed.rejected.len() <= lines);
    }
});
