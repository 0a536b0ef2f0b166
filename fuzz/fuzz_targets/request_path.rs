//! Fuzz target for request path construction.
//!
//! Arbitrary strings must either be rejected with an error or produce a path
//! whose absolute form is normalized and stays comparable to itself.
//!
//! Run with: cargo +nightly fuzz run request_path

#![no_main]

use libfuzzer_sys::fuzz_target;
use stackio::RequestPath;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(path) = RequestPath::from_root("/fuzz/root", s) {
        assert_eq!(path, path.clone());
        let _ = path.is_under(std::path::Path::new("/fuzz/root"));
        let _ = path.file_name();
    }
    let _ = RequestPath::new(s);
});
