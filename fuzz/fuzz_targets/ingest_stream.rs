#![no_main]

use libfuzzer_sys::fuzz_target;
use serclient_agent::Packet;

// Feeds arbitrary bytes through the same has_full_packet/decode loop the
// watcher's ingest phase uses, checking it never consumes more than one
// packet's worth of bytes per decode and never panics on malformed input.
fuzz_target!(|data: &[u8]| {
    let mut buf = data.to_vec();

    while Packet::has_full_packet(&buf) {
        match Packet::decode(&buf) {
            Ok((_, consumed)) => {
                assert!(consumed > 0);
                assert!(consumed <= buf.len());
                buf.drain(..consumed);
            }
            Err(_) => break,
        }
    }
});
