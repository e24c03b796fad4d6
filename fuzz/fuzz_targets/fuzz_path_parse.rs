#![no_main]

use canopy_core::Path;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(path) = Path::parse(text) {
        let printed = path.to_string();
        let reparsed = Path::parse(&printed).expect("printed path parses");
        assert_eq!(reparsed, path);
    }
});
