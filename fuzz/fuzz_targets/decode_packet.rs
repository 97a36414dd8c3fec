#![no_main]
use libfuzzer_sys::fuzz_target;

use lifx_core::Message;

fuzz_target!(|data: &[u8]| {
    // anything off the network must decode or fail cleanly
    let packet = match lifx_core::decode(data) {
        Ok(packet) => packet,
        Err(_) => return,
    };

    // f32 signal strengths can be NaN, which never compares equal
    if let Message::StateHostInfo { .. } | Message::StateWifiInfo { .. } = packet.message {
        return;
    }

    let sequence = packet.sequence();
    let bytes = lifx_core::encode(sequence, packet.message.clone()).unwrap();
    let again = lifx_core::decode(&bytes).unwrap();
    assert_eq!(packet.message, again.message);
    assert_eq!(again.frame.protocol, 1024);
});
