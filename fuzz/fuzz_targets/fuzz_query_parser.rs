#![no_main]

use libfuzzer_sys::fuzz_target;
use textsearch::query::{parse, simplify};

fuzz_target!(|data: &str| {
    // Parsing and simplifying must never panic
    if let Ok(q) = parse(data) {
        let _ = simplify(q.clone()).to_string();
        let _ = q.to_string();
    }
});
