#![no_main]

use cellisp::{Heap, Reader};
use libfuzzer_sys::fuzz_target;

// Arbitrary text must never panic the reader, and every slot stays either
// free or active whatever it reads.
fuzz_target!(|source: &str| {
    let Ok(mut heap) = Heap::new(128) else { return };
    let mut reader = Reader::from_source(source).with_token_limit(16);

    for _ in 0..64 {
        match reader.read(&mut heap) {
            Ok(Some(datum)) => {
                let _ = heap.display(datum).to_string();
            }
            Ok(None) => break,
            Err(_) => {}
        }
        let stats = heap.stats();
        assert_eq!(stats.free + stats.active, stats.capacity);
    }
    assert_eq!(heap.pinned_count(), 0);
});
