#![no_main]

use libfuzzer_sys::fuzz_target;

use mempool_core::ChunkSizing;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize % (1 << 20) + 1;
    let target = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize % (1 << 22) + 1;
    let sizing = ChunkSizing {
        target_bytes: target,
        ..ChunkSizing::default()
    };

    // Should not panic, and must always fit at least one object.
    let layout = sizing.layout(size);
    assert!(layout.capacity >= 1);
    assert_eq!(layout.bytes, usize::from(layout.capacity) * size);
});
