//! Decoding arbitrary bytes never panics, and whatever decodes re-encodes
//! to a frame that decodes to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rebound_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let Ok(decoded) = Frame::decode(data) else {
        return;
    };
    assert_eq!(decoded.raw().as_ref(), data);

    let frame = decoded.into_frame();
    let bytes = frame.to_bytes().unwrap();
    assert!(bytes.len() <= data.len());
    assert_eq!(Frame::decode(&bytes).unwrap().frame(), &frame);
});
