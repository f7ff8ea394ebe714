//! Fuzz target: `codec::decode`
//!
//! Any byte sequence either fails with a typed error or decodes to values
//! that re-encode to a canonical form decoding to the same values.
//!
//! cargo fuzz run fuzz_value_decode

#![no_main]

use ctrlplane::rpc::codec;
use ctrlplane::rpc::value::Value;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(values) = codec::decode(data) else {
        return;
    };
    if values.is_empty() {
        return;
    }
    let canonical = codec::encode(&values).expect("decoded values must re-encode");
    let again = codec::decode(&canonical).expect("canonical encoding must decode");
    assert_eq!(values.len(), again.len());
    for (a, b) in values.iter().zip(&again) {
        // NaN floats survive bit-for-bit but never compare equal.
        if matches!(a, Value::F32(f) if f.is_nan()) || matches!(a, Value::F64(f) if f.is_nan()) {
            continue;
        }
        assert_eq!(a, b);
    }
});
