#![no_main]

use certscore_lib::{BatchFile, BatchLimits, BatchUrlParser, ValidationError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary upload content must be accepted or rejected, never panic.
    let parser = BatchUrlParser::new(BatchLimits::default());
    let file = BatchFile::new("urls.txt", "text/plain", data.to_vec());
    match parser.parse(&file) {
        Ok(urls) => {
            assert!(urls.len() <= BatchLimits::default().max_urls);
            for url in &urls {
                assert_eq!(url.url().scheme(), "https");
                assert!(!url.host().is_empty());
            }
        }
        Err(ValidationError::InvalidBatch { messages }) => assert!(!messages.is_empty()),
        Err(_) => {}
    }
});
