#![no_main]

use libfuzzer_sys::fuzz_target;
use whisperers_client::{demultiplex, PendingReply};

fuzz_target!(|data: &[u8]| {
    // The transport hands over lossily decoded chunks, so do the same here.
    let chunk = String::from_utf8_lossy(data);

    // Exercise every pending-reply context.
    for pending in [None, Some(PendingReply::Create), Some(PendingReply::Join)] {
        let events = demultiplex(&chunk, pending);
        if chunk.trim() == "SERVER_SHUTDOWN" {
            assert_eq!(events.len(), 1);
        }
    }
});
