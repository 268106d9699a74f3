//! Fuzz target for inbound frame decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_codec_decode
//!
//! Controller frames are untrusted input. Decoding must never panic, and any
//! frame that decodes must classify and re-serialize cleanly.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pawlink_core::codec;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(payload) = codec::decode(text) {
        let _ = payload.kind();
        let _ = payload.battery();
        let _ = payload.error_message();
        let event = codec::StatusEvent::Payload { payload };
        assert!(!event.to_string().is_empty());
    }
    if let Ok(command) = codec::decode_command(text) {
        let _ = codec::encode(&command);
    }
});

