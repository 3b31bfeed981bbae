#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Fuzz command parsing with arbitrary strings.
    // This should not panic or cause undefined behavior.
    let _ = logscope::server::protocol::parse_command(data);
});
