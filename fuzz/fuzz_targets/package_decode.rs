#![no_main]

use libfuzzer_sys::fuzz_target;
use reprobuild_package::{decode, encode};

// Any accepted document re-encodes to an equivalent package.
fuzz_target!(|data: &[u8]| {
    if let Ok(package) = decode(data) {
        let bytes = encode(&package).expect("decoded package must encode");
        let again = decode(&bytes).expect("encoded package must decode");
        assert_eq!(package, again);
    }
});
