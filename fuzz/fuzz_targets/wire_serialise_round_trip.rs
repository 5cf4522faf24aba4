#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_wire::serialise::build_query;
use dns_wire::types::{DomainName, Message};

// Any name we accept into the query builder must, once built, parse back
// into a question with that same name.
fuzz_target!(|input: (String, u16, bool)| {
    let (raw_name, qtype, use_edns) = input;
    let name = DomainName::new(&raw_name);
    if name.labels().iter().any(|l| l.is_empty() || l.len() > 63) {
        return;
    }

    let Ok(wire) = build_query(&name, qtype, use_edns) else {
        return;
    };
    let message = Message::from_octets(&wire).expect("a message this crate built must parse");
    assert_eq!(message.questions[0].name, name);
});
