#![no_main]

use libfuzzer_sys::fuzz_target;
use siftql::{load_csv_str, write_csv_string};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(table) = load_csv_str(input) {
        if let Ok(out) = write_csv_string(&table) {
            let _ = load_csv_str(&out);
        }
    }
});
