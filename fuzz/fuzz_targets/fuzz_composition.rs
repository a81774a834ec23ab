//! Fuzz target: `CompositionData::parse`
//!
//! Composition pages come straight off the air.  Decoding must never panic
//! and every decoded model must have been backed by input bytes.
//!
//! cargo fuzz run fuzz_composition

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshgate::mesh::composition::CompositionData;

fuzz_target!(|data: &[u8]| {
    if let Ok(comp) = CompositionData::parse(data) {
        let models: usize = comp
            .elements
            .iter()
            .map(|e| 2 * e.sig_models.len() + 4 * e.vendor_models.len() + 4)
            .sum();
        assert!(10 + models <= data.len());
        let _ = comp.to_string();
    }
});
