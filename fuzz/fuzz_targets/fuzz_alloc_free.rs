#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;

use mempool_core::MemPools;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    // First two bytes pick the object size, the third the idle limit.
    let size = usize::from(u16::from_le_bytes([data[0], data[1]])) % 4096 + 1;
    let pools = MemPools::new();
    pools.set_idle_limit(i64::from(data[2]) * 1024).unwrap();
    let pool = pools.create("fuzz", size).unwrap();

    let mut live = Vec::new();
    for &byte in &data[3..] {
        match byte % 8 {
            0..=3 => live.push(pool.alloc()),
            4..=6 if !live.is_empty() => {
                let obj = live.swap_remove(usize::from(byte) % live.len());
                pool.free_one(obj).unwrap();
                // Freeing twice must be rejected, never corrupt the pool.
                assert!(pool.free_one(obj).is_err());
            }
            _ => pools.clean(Duration::ZERO),
        }
        assert_eq!(pool.in_use_count(), live.len());
    }
});
