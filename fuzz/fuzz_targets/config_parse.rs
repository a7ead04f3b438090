//! Fuzz target for the settings file parser.
//!
//! Any input must parse without panicking, and rendering the result must
//! parse back to the same known keys.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oclip::config::{parse, render, Config};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let config = Config::from_raw(&parse(s));
        let reparsed = Config::from_raw(&parse(&render(&config)));
        assert_eq!(config, reparsed);
    }
});
