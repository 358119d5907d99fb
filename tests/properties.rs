//! Property-based tests for pool accounting under random churn.

use std::time::Duration;

use proptest::prelude::*;

use mempool_core::{MemPools, ObjectRef, PoolHandle};

#[derive(Debug, Clone)]
enum Op {
    Alloc,
    Free(usize),
    Clean,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => Just(Op::Alloc),
        4 => any::<usize>().prop_map(Op::Free),
        1 => Just(Op::Clean),
    ]
}

fn stamp(pool: &PoolHandle, obj: ObjectRef, value: u32) {
    pool.with_bytes_mut(obj, |bytes| bytes[..4].copy_from_slice(&value.to_le_bytes()))
        .unwrap();
}

fn read(pool: &PoolHandle, obj: ObjectRef) -> u32 {
    pool.with_bytes(obj, |bytes| {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    })
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// In-use count tracks allocs minus frees and never exceeds what the
    /// chunks can hold; new chunks appear only when every slot is taken.
    #[test]
    fn chunked_accounting(
        size in 4usize..600,
        limit in prop_oneof![Just(0i64), Just(4096i64), Just(2i64 << 20)],
        ops in prop::collection::vec(op(), 1..400),
    ) {
        let pools = MemPools::new();
        pools.set_idle_limit(limit).unwrap();
        let pool = pools.create("prop", size).unwrap();
        let mut live: Vec<(ObjectRef, u32)> = Vec::new();
        let (mut allocs, mut frees) = (0usize, 0usize);
        let mut next = 0u32;

        for op in ops {
            match op {
                Op::Alloc => {
                    let before = pool.stats();
                    let obj = pool.alloc();
                    let after = pool.stats();
                    if before.in_use < before.chunks * before.chunk_capacity {
                        prop_assert_eq!(after.chunks, before.chunks);
                    }
                    stamp(&pool, obj, next);
                    live.push((obj, next));
                    next += 1;
                    allocs += 1;
                }
                Op::Free(index) if !live.is_empty() => {
                    let (obj, _) = live.swap_remove(index % live.len());
                    pool.free_one(obj).unwrap();
                    prop_assert!(pool.free_one(obj).is_err());
                    frees += 1;
                }
                Op::Free(_) => {}
                Op::Clean => pools.clean(Duration::ZERO),
            }

            let stats = pool.stats();
            prop_assert_eq!(stats.in_use, allocs - frees);
            prop_assert!(stats.in_use <= stats.chunks * stats.chunk_capacity);
            prop_assert_eq!(stats.allocated_bytes, stats.chunks * stats.chunk_capacity * size);
            prop_assert_eq!(stats.idle_bytes, stats.allocated_bytes - stats.in_use * size);
        }

        // Live objects never alias each other.
        for &(obj, value) in &live {
            prop_assert_eq!(read(&pool, obj), value);
        }

        pools.flush_meters();
        let total = pools.total_meter();
        prop_assert_eq!(total.gb_allocated.count, allocs as u64);
        prop_assert_eq!(total.gb_freed.count, frees as u64);
    }

    /// Once everything is freed, a zero-age sweep returns all memory.
    #[test]
    fn sweep_after_drain_releases_all(
        size in 1usize..5000,
        count in 1usize..2000,
    ) {
        let pools = MemPools::new();
        let pool = pools.create("drain", size).unwrap();
        let objs: Vec<_> = (0..count).map(|_| pool.alloc()).collect();
        for obj in objs {
            pool.free_one(obj).unwrap();
        }
        pools.clean(Duration::ZERO);
        let stats = pool.stats();
        prop_assert_eq!(stats.chunks, 0);
        prop_assert_eq!(stats.idle_bytes, 0);
        prop_assert_eq!(pools.idle_bytes(), 0);
    }

    /// Direct pools hold exactly the live bytes.
    #[test]
    fn direct_holds_only_live_bytes(
        size in 1usize..2048,
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let pools = MemPools::new();
        pools.set_default_pool_chunking(false);
        let pool = pools.create("direct", size).unwrap();
        let mut live = Vec::new();
        for op in ops {
            match op {
                Op::Alloc => live.push(pool.alloc()),
                Op::Free(index) if !live.is_empty() => {
                    let obj = live.swap_remove(index % live.len());
                    pool.free_one(obj).unwrap();
                }
                Op::Free(_) | Op::Clean => pools.clean(Duration::ZERO),
            }
            let stats = pool.stats();
            prop_assert_eq!(stats.allocated_bytes, live.len() * size);
            prop_assert_eq!(stats.idle_bytes, 0);
        }
    }
}
