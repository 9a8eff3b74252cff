//! Fuzz the tree codec decoder with arbitrary bytes.
//!
//! The decoder must never panic or over-allocate, and anything it accepts
//! must re-encode and decode to the same tree.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(node) = treeline_proto::decode(data) {
        let wire = treeline_proto::encode(&node).expect("decoded trees always re-encode");
        let again = treeline_proto::decode(&wire).expect("encoder output always decodes");
        assert_eq!(node, again);
    }
});
