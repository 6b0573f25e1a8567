#![no_main]

use libfuzzer_sys::fuzz_target;
use reprobuild_package::validate_relative_path;

// Accepted paths can never escape the materialization root.
fuzz_target!(|path: &str| {
    if validate_relative_path(path).is_ok() {
        assert!(!path.starts_with('/'));
        assert!(!path.contains('\\'));
        assert!(path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != ".."));
    }
});
