#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_wire::types::Message;

// A decoder must never panic on arbitrary input, and a record it does
// accept must carry RDATA that stays within the bytes it was parsed from.
fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::from_octets(data) {
        for rr in message
            .answers
            .iter()
            .chain(&message.authority)
            .chain(&message.additional)
        {
            assert!(rr.rdata_offset + rr.rdata.len() <= message.wire.len());
        }
    }
});
