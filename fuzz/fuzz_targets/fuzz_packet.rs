#![no_main]

use libfuzzer_sys::fuzz_target;
use handshake_protocol::{PacketRegistry, WireContext};

fuzz_target!(|data: &[u8]| {
    // First byte picks the wire context, the rest is the datagram
    let Some((&selector, datagram)) = data.split_first() else {
        return;
    };
    let max_clients = u32::from(selector & 0x7F) + 1;
    let context = if selector & 0x80 != 0 {
        WireContext::insecure(max_clients)
    } else {
        WireContext::secure(max_clients)
    };
    let registry = PacketRegistry::new(context);

    // Anything that decodes must re-encode to the same bytes
    if let Ok(packet) = registry.decode(datagram) {
        let encoded = registry.encode(packet).expect("decoded packet must encode");
        assert_eq!(&encoded[..], datagram);
    }
});
