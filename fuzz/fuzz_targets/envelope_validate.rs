//! Fuzz target for envelope parsing and validation.
//!
//! Arbitrary JSON-ish input is parsed as either envelope type and, when it
//! parses, run through `validate` and the hop/TTL arithmetic. None of it may
//! panic.

#![no_main]

use lantern_proto::{KeyEnvelope, MessageEnvelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(env) = serde_json::from_str::<MessageEnvelope>(text) {
        let _ = env.validate();
        if let Ok(hopped) = env.with_hop("ffffffffffffffffffffffffffffffff", env.timestamp) {
            let _ = hopped.validate();
        }
    }

    if let Ok(key) = serde_json::from_str::<KeyEnvelope>(text) {
        let _ = key.validate();
    }
});
