#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz the line index over arbitrary byte views: build must uphold its
    // offset invariants, and incremental extension must agree with a full
    // rebuild at every split point.
    let index = logscope::index::LineIndex::build(data);
    let count = index.line_count();
    for i in 0..count {
        let (lo, hi) = index.line_range(i);
        assert!(lo <= hi);
        assert!(hi <= data.len() as u64);
    }

    let split = data.len() / 2;
    let mut incremental = logscope::index::LineIndex::build(&data[..split]);
    incremental.extend(data, split as u64);
    assert_eq!(incremental.line_count(), count);
});
