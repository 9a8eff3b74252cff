//! Fuzz the frame buffer with arbitrarily fragmented input.
//!
//! Splits the input into chunks at fuzzer-chosen positions and checks that
//! draining frames never panics regardless of how reads are fragmented.

#![no_main]

use libfuzzer_sys::fuzz_target;
use treeline_proto::FrameBuffer;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let mut buffer = FrameBuffer::new();
    for chunk in rest.chunks(usize::from(split).max(1)) {
        buffer.extend(chunk);
        while let Some(frame) = buffer.next_frame() {
            assert!(frame.len() <= treeline_proto::frame::MAX_FRAME_LEN);
        }
    }
});
