//! Fuzz target for wire-frame decoding.
//!
//! Feeds arbitrary bytes through both frame parsers to find panics in the
//! JSON layer or the tag dispatch. Invalid input must only ever produce an
//! error, never a crash.

#![no_main]

use lantern_proto::{decode_frame, HubFrame, PeerFrame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = decode_frame::<PeerFrame>(text);
    let _ = decode_frame::<HubFrame>(text);
});
