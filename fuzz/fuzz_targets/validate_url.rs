#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(url) = certscore_lib::validate(input) {
        // Anything accepted has a host to dial over TLS.
        assert_eq!(url.url().scheme(), "https");
        assert!(!url.host().is_empty());
    }
});
