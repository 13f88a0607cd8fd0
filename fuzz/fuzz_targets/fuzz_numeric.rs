#![no_main]

use libfuzzer_sys::fuzz_target;
use nfe_ingest::core::parse_locale_decimal;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_locale_decimal(Some(s));
    }
});
