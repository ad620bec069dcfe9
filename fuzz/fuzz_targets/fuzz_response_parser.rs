//! Fuzz target: typed response parsing
//!
//! Feeds arbitrary text through every typed response body.  Parsing may
//! fail but must never panic.
//!
//! cargo fuzz run fuzz_response_parser

#![no_main]

use ezoctl::ezo::ResponseBody;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    for mut body in [
        ResponseBody::bool(),
        ResponseBody::int(),
        ResponseBody::double(),
        ResponseBody::info(),
        ResponseBody::status(),
        ResponseBody::slope(),
        ResponseBody::parameters(),
        ResponseBody::memory(),
        ResponseBody::temperature_scale(),
    ] {
        let _ = body.parse(text);
    }
});
