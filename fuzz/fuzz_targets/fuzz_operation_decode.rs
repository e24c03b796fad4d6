#![no_main]

use canopy_core::Operation;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(op) = serde_json::from_slice::<Operation>(data) {
        let encoded = serde_json::to_vec(&op).expect("operation encodes");
        let decoded: Operation = serde_json::from_slice(&encoded).expect("encoded operation decodes");
        assert_eq!(decoded, op);
    }
});
