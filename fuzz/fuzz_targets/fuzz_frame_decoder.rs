//! Fuzz target: `decode_frame`
//!
//! Drives arbitrary byte sequences into the EZO frame decoder and asserts
//! that it never panics and never yields text longer than a frame holds.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use ezoctl::ezo::{MAX_TEXT_LEN, decode_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = decode_frame(data) {
        assert!(text.len() <= MAX_TEXT_LEN, "text exceeds frame capacity");
        assert!(!text.contains('\0'), "text runs past the terminator");
    }
});
