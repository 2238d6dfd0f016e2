#![no_main]

use libfuzzer_sys::fuzz_target;
use serclient_agent::Packet;

fuzz_target!(|data: &[u8]| {
    if !Packet::has_full_packet(data) {
        return;
    }

    match Packet::decode(data) {
        Ok((packet, consumed)) => {
            assert!(consumed <= data.len());
            let reencoded = packet.encode();
            let (roundtripped, consumed2) =
                Packet::decode(&reencoded).expect("a packet we just decoded must re-decode");
            assert_eq!(consumed2, reencoded.len());
            assert_eq!(packet, roundtripped);
        }
        Err(_) => {}
    }
});
