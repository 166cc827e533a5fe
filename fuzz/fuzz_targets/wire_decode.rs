#![no_main]

use layoutkeep_core::wire;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary text as a compact string.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(snapshot) = wire::decode(text) {
            let again = wire::decode(&wire::encode(&snapshot))
                .expect("re-encoded snapshot must decode");
            assert_eq!(again.tab_count(), snapshot.tab_count());
            assert_eq!(again.popouts.len(), snapshot.popouts.len());
        }
    }

    // Arbitrary JSON as the decoded compact value.
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Ok(snapshot) = wire::from_compact_value(&value) {
            let _ = wire::to_compact_value(&snapshot);
        }
    }
});
