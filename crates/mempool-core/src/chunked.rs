//! Chunked pool strategy.
//!
//! Objects live in page-multiple chunks. Frees first land in a pool-level
//! free-list cache; `clean` reconciles the cache into the home chunks, frees
//! chunks that have been wholly idle long enough, and re-sorts the rest so
//! allocation favours the fullest chunks.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::chunk::{Chunk, SlotState};
use crate::clock::Clock;
use crate::config::ChunkLayout;
use crate::pool::{CleanOutcome, Freed, ObjectRef, PoolId, PoolStrategy, SlotFault};

/// A slot in the chunk table. Released chunks leave a vacant entry whose
/// generation has moved on, so references into them are detected as stale.
struct ChunkEntry {
    generation: u32,
    chunk: Option<Chunk>,
}

struct CachedSlot {
    block: u32,
    slot: u16,
    freed_at: Instant,
}

/// Options for a chunked pool.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedOptions {
    /// Chunk geometry.
    pub layout: ChunkLayout,
    /// Maximum free-list cache length.
    pub cache_limit: usize,
    /// Zero objects on free.
    pub zero_on_release: bool,
}

/// Pool strategy grouping objects into chunks.
pub struct ChunkedPool {
    pool: PoolId,
    label: String,
    object_size: usize,
    options: ChunkedOptions,
    entries: Vec<ChunkEntry>,
    vacant: Vec<u32>,
    /// Live chunk indices, fullest first as of the last `clean`.
    order: Vec<u32>,
    /// Chunks whose own free list is non-empty. The last entry serves the
    /// next cache miss.
    with_space: Vec<u32>,
    cache: Vec<CachedSlot>,
    next_seq: u64,
    in_use: usize,
    clock: Arc<dyn Clock>,
}

impl ChunkedPool {
    /// Create an empty chunked pool. No memory is allocated until the first
    /// `allocate`.
    pub fn new(
        pool: PoolId,
        label: &str,
        object_size: usize,
        options: ChunkedOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            label: label.to_owned(),
            object_size,
            options,
            entries: Vec::new(),
            vacant: Vec::new(),
            order: Vec::new(),
            with_space: Vec::new(),
            cache: Vec::new(),
            next_seq: 0,
            in_use: 0,
            clock,
        }
    }

    fn live_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().filter_map(|entry| entry.chunk.as_ref())
    }

    fn object(&self, block: u32, slot: u16) -> ObjectRef {
        let generation = self.entries[block as usize].generation;
        ObjectRef::new(self.pool, block, generation, slot)
    }

    fn take_cached(&mut self) -> Option<ObjectRef> {
        let cached = self.cache.pop()?;
        let chunk = self.entries[cached.block as usize].chunk.as_mut()?;
        chunk.take_cached(cached.slot);
        self.in_use += 1;
        Some(self.object(cached.block, cached.slot))
    }

    fn take_from_chunks(&mut self) -> Option<ObjectRef> {
        let &block = self.with_space.last()?;
        let chunk = self.entries[block as usize].chunk.as_mut()?;
        let slot = chunk.take()?;
        if !chunk.has_free_slot() {
            self.with_space.pop();
        }
        self.in_use += 1;
        Some(self.object(block, slot))
    }

    /// Rebuild `with_space` from `order` so the fullest chunk is on top.
    fn restack(&mut self) {
        let entries = &self.entries;
        self.with_space.clear();
        self.with_space.extend(self.order.iter().rev().copied().filter(|&block| {
            entries[block as usize]
                .chunk
                .as_ref()
                .is_some_and(Chunk::has_free_slot)
        }));
    }

    fn grow(&mut self) -> ObjectRef {
        let mut chunk = Chunk::new(
            self.options.layout,
            self.object_size,
            self.next_seq,
            self.clock.now(),
        );
        self.next_seq += 1;
        let slot = chunk.take().unwrap_or_default();
        let has_space = chunk.has_free_slot();

        let block = if let Some(block) = self.vacant.pop() {
            self.entries[block as usize].chunk = Some(chunk);
            block
        } else {
            self.entries.push(ChunkEntry {
                generation: 0,
                chunk: Some(chunk),
            });
            u32::try_from(self.entries.len() - 1).unwrap_or(u32::MAX)
        };
        self.order.push(block);
        if has_space {
            self.with_space.push(block);
        }
        self.in_use += 1;
        debug!(
            pool = %self.label,
            chunks = self.order.len(),
            capacity = self.options.layout.capacity,
            bytes = self.options.layout.bytes,
            "allocated chunk"
        );
        self.object(block, slot)
    }

    fn checked_out(&self, obj: ObjectRef) -> Result<&Chunk, SlotFault> {
        let entry = self
            .entries
            .get(obj.block as usize)
            .ok_or(SlotFault::OutOfRange)?;
        let chunk = match &entry.chunk {
            Some(chunk) if entry.generation == obj.generation => chunk,
            _ => return Err(SlotFault::Stale),
        };
        match chunk.state(obj.slot) {
            Some(SlotState::CheckedOut) => Ok(chunk),
            Some(_) => Err(SlotFault::NotCheckedOut),
            None => Err(SlotFault::OutOfRange),
        }
    }

    fn checked_out_mut(&mut self, obj: ObjectRef) -> Result<&mut Chunk, SlotFault> {
        self.checked_out(obj)?;
        self.entries[obj.block as usize]
            .chunk
            .as_mut()
            .ok_or(SlotFault::Stale)
    }
}

impl PoolStrategy for ChunkedPool {
    fn allocate(&mut self) -> ObjectRef {
        if let Some(obj) = self.take_cached() {
            return obj;
        }
        if let Some(obj) = self.take_from_chunks() {
            return obj;
        }
        self.grow()
    }

    fn deallocate(&mut self, obj: ObjectRef, aggressive: bool) -> Result<Freed, SlotFault> {
        let zero = self.options.zero_on_release;
        let to_chunk = aggressive || self.cache.len() >= self.options.cache_limit;
        let now = self.clock.now();

        let chunk = self.checked_out_mut(obj)?;
        if zero {
            chunk.slot_bytes_mut(obj.slot).fill(0);
        }
        let freed = if to_chunk {
            let was_full = !chunk.has_free_slot();
            chunk.put(obj.slot, now);
            if was_full {
                self.with_space.push(obj.block);
            }
            Freed::Returned
        } else {
            chunk.mark_cached(obj.slot);
            self.cache.push(CachedSlot {
                block: obj.block,
                slot: obj.slot,
                freed_at: now,
            });
            Freed::Cached
        };
        self.in_use -= 1;
        Ok(freed)
    }

    fn bytes(&self, obj: ObjectRef) -> Result<&[u8], SlotFault> {
        Ok(self.checked_out(obj)?.slot_bytes(obj.slot))
    }

    fn bytes_mut(&mut self, obj: ObjectRef) -> Result<&mut [u8], SlotFault> {
        Ok(self.checked_out_mut(obj)?.slot_bytes_mut(obj.slot))
    }

    fn in_use_count(&self) -> usize {
        self.in_use
    }

    fn allocated_bytes(&self) -> usize {
        self.order.len() * self.options.layout.bytes
    }

    fn idle_bytes(&self) -> usize {
        self.allocated_bytes() - self.in_use * self.object_size
    }

    fn clean(&mut self, max_age: Duration, keep_free: usize) -> CleanOutcome {
        let now = self.clock.now();

        for cached in self.cache.drain(..) {
            if let Some(chunk) = self.entries[cached.block as usize].chunk.as_mut() {
                chunk.put(cached.slot, cached.freed_at);
            }
        }

        let mut outcome = CleanOutcome::default();
        let mut keep = keep_free;
        let chunk_bytes = self.options.layout.bytes;
        let entries = &mut self.entries;
        let vacant = &mut self.vacant;
        self.order.retain(|&block| {
            let entry = &mut entries[block as usize];
            let Some(chunk) = entry.chunk.as_ref() else {
                return false;
            };
            if !chunk.is_free() {
                return true;
            }
            if keep > 0 {
                keep -= 1;
                return true;
            }
            match chunk.idle_for(now) {
                Some(age) if age >= max_age => {}
                _ => return true,
            }
            entry.chunk = None;
            entry.generation = entry.generation.wrapping_add(1);
            vacant.push(block);
            outcome.released_chunks += 1;
            outcome.released_bytes += chunk_bytes;
            false
        });

        let entries = &self.entries;
        self.order.sort_by_key(|&block| {
            entries[block as usize]
                .chunk
                .as_ref()
                .map_or((Reverse(0), u64::MAX), |chunk| {
                    (Reverse(chunk.in_use()), chunk.seq())
                })
        });
        self.restack();
        outcome
    }

    fn chunk_count(&self) -> usize {
        self.order.len()
    }

    fn chunk_capacity(&self) -> usize {
        usize::from(self.options.layout.capacity)
    }

    fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn chunk_free_count(&self) -> usize {
        self.live_chunks()
            .map(|chunk| chunk.capacity() - chunk.in_use())
            .sum()
    }

    fn is_chunked(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChunkSizing;

    fn pool_with(object_size: usize, cache_limit: usize) -> (ChunkedPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let layout = ChunkSizing::default().layout(object_size);
        let pool = ChunkedPool::new(
            PoolId::next(),
            "test",
            object_size,
            ChunkedOptions {
                layout,
                cache_limit,
                zero_on_release: true,
            },
            clock.clone(),
        );
        (pool, clock)
    }

    #[test]
    fn first_allocation_creates_one_chunk() {
        let (mut pool, _) = pool_with(64, 256);
        assert_eq!(pool.chunk_count(), 0);
        let _ = pool.allocate();
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.chunk_capacity(), 256);
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.idle_bytes(), 255 * 64);
    }

    #[test]
    fn grows_only_when_full() {
        let (mut pool, _) = pool_with(64, 256);
        let objs: Vec<_> = (0..257).map(|_| pool.allocate()).collect();
        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.in_use_count(), 257);
        assert_ne!(objs[0].block, objs[256].block);
    }

    #[test]
    fn freed_object_is_reused_before_growth() {
        let (mut pool, _) = pool_with(64, 256);
        let objs: Vec<_> = (0..256).map(|_| pool.allocate()).collect();
        assert_eq!(pool.deallocate(objs[7], false), Ok(Freed::Cached));
        let again = pool.allocate();
        assert_eq!(again, objs[7]);
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn aggressive_free_goes_to_chunk() {
        let (mut pool, _) = pool_with(64, 256);
        let obj = pool.allocate();
        assert_eq!(pool.deallocate(obj, true), Ok(Freed::Returned));
        assert_eq!(pool.cached_count(), 0);
        assert_eq!(pool.chunk_free_count(), 256);
    }

    #[test]
    fn full_cache_spills_to_chunk() {
        let (mut pool, _) = pool_with(64, 2);
        let objs: Vec<_> = (0..3).map(|_| pool.allocate()).collect();
        assert_eq!(pool.deallocate(objs[0], false), Ok(Freed::Cached));
        assert_eq!(pool.deallocate(objs[1], false), Ok(Freed::Cached));
        assert_eq!(pool.deallocate(objs[2], false), Ok(Freed::Returned));
        assert_eq!(pool.cached_count(), 2);
    }

    #[test]
    fn double_free_is_detected() {
        let (mut pool, _) = pool_with(64, 256);
        let obj = pool.allocate();
        pool.deallocate(obj, false).unwrap();
        assert_eq!(pool.deallocate(obj, false), Err(SlotFault::NotCheckedOut));
        pool.clean(Duration::from_secs(60), 0);
        assert_eq!(pool.deallocate(obj, true), Err(SlotFault::NotCheckedOut));
    }

    #[test]
    fn released_chunk_references_are_stale() {
        let (mut pool, _) = pool_with(64, 256);
        let obj = pool.allocate();
        pool.deallocate(obj, true).unwrap();
        let outcome = pool.clean(Duration::ZERO, 0);
        assert_eq!(outcome.released_chunks, 1);
        assert_eq!(pool.bytes(obj), Err(SlotFault::Stale));

        // The vacant entry is reused under a new generation.
        let fresh = pool.allocate();
        assert_eq!(fresh.block, obj.block);
        assert_ne!(fresh.generation, obj.generation);
        assert_eq!(pool.deallocate(obj, true), Err(SlotFault::Stale));
    }

    #[test]
    fn out_of_range_reference() {
        let (mut pool, _) = pool_with(64, 256);
        let obj = pool.allocate();
        let bogus = ObjectRef::new(obj.pool, 9, 0, 0);
        assert_eq!(pool.bytes(bogus), Err(SlotFault::OutOfRange));
        let bogus = ObjectRef::new(obj.pool, obj.block, obj.generation, 300);
        assert_eq!(pool.bytes(bogus), Err(SlotFault::OutOfRange));
    }

    #[test]
    fn clean_waits_for_max_age() {
        let (mut pool, clock) = pool_with(64, 256);
        let objs: Vec<_> = (0..10).map(|_| pool.allocate()).collect();
        for obj in objs {
            pool.deallocate(obj, false).unwrap();
        }
        assert_eq!(pool.cached_count(), 10);

        let outcome = pool.clean(Duration::from_secs(60), 0);
        assert_eq!(outcome, CleanOutcome::default());
        assert_eq!(pool.cached_count(), 0);
        assert_eq!(pool.chunk_count(), 1);

        clock.advance(Duration::from_secs(60));
        let outcome = pool.clean(Duration::from_secs(60), 0);
        assert_eq!(outcome.released_chunks, 1);
        assert_eq!(outcome.released_bytes, 16384);
        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.idle_bytes(), 0);
    }

    #[test]
    fn cached_free_age_counts_from_free_time() {
        let (mut pool, clock) = pool_with(64, 256);
        let obj = pool.allocate();
        pool.deallocate(obj, false).unwrap();
        clock.advance(Duration::from_secs(120));
        // Reconciled now, but idle since the free two minutes ago.
        let outcome = pool.clean(Duration::from_secs(60), 0);
        assert_eq!(outcome.released_chunks, 1);
    }

    #[test]
    fn clean_keeps_free_chunk_floor() {
        let (mut pool, clock) = pool_with(64, 0);
        let objs: Vec<_> = (0..512).map(|_| pool.allocate()).collect();
        for obj in objs {
            pool.deallocate(obj, false).unwrap();
        }
        clock.advance(Duration::from_secs(10));
        let outcome = pool.clean(Duration::ZERO, 1);
        assert_eq!(outcome.released_chunks, 1);
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn clean_sorts_fullest_first() {
        let (mut pool, _) = pool_with(1024, 0);
        // 1024-byte objects: 32 per chunk.
        let objs: Vec<_> = (0..64).map(|_| pool.allocate()).collect();
        // Leave chunk 0 nearly empty, chunk 1 nearly full.
        for obj in objs.iter().filter(|o| o.block == 0).skip(1) {
            pool.deallocate(*obj, true).unwrap();
        }
        pool.deallocate(objs[63], true).unwrap();
        pool.clean(Duration::from_secs(3600), 0);

        let next = pool.allocate();
        assert_eq!(next.block, 1, "fullest chunk serves first");
    }

    #[test]
    fn clean_twice_is_idempotent() {
        let (mut pool, clock) = pool_with(64, 256);
        let objs: Vec<_> = (0..300).map(|_| pool.allocate()).collect();
        for obj in &objs[..256] {
            pool.deallocate(*obj, false).unwrap();
        }
        clock.advance(Duration::from_secs(5));
        let first = pool.clean(Duration::from_secs(1), 0);
        let chunks = pool.chunk_count();
        let in_use = pool.in_use_count();
        let second = pool.clean(Duration::from_secs(1), 0);
        assert_eq!(first.released_chunks, 1);
        assert_eq!(second, CleanOutcome::default());
        assert_eq!(pool.chunk_count(), chunks);
        assert_eq!(pool.in_use_count(), in_use);
    }

    #[test]
    fn freed_bytes_are_zeroed() {
        let (mut pool, _) = pool_with(8, 256);
        let obj = pool.allocate();
        pool.bytes_mut(obj).unwrap().copy_from_slice(b"abcdefgh");
        assert_eq!(pool.bytes(obj).unwrap(), b"abcdefgh");
        pool.deallocate(obj, false).unwrap();
        let again = pool.allocate();
        assert_eq!(again, obj);
        assert_eq!(pool.bytes(again).unwrap(), &[0u8; 8]);
    }

    #[test]
    fn cache_miss_takes_chunk_on_top() {
        let (mut pool, _) = pool_with(1024, 0);
        let objs: Vec<_> = (0..40 * 32).map(|_| pool.allocate()).collect();
        assert_eq!(pool.chunk_count(), 40);
        assert!(pool.with_space.is_empty());

        let freed = objs[10 * 32 + 5];
        assert_eq!(freed.block, 10);
        pool.deallocate(freed, true).unwrap();
        assert_eq!(pool.with_space, vec![10]);

        let again = pool.allocate();
        assert_eq!(again, freed);
        assert!(pool.with_space.is_empty());

        let _ = pool.allocate();
        assert_eq!(pool.chunk_count(), 41);
        assert_eq!(pool.with_space.len(), 1);
    }

    #[test]
    fn clean_restacks_fullest_on_top() {
        let (mut pool, _) = pool_with(1024, 0);
        let objs: Vec<_> = (0..96).map(|_| pool.allocate()).collect();
        // Chunk 0 keeps 1 object, chunk 1 keeps 31, chunk 2 keeps 16.
        for obj in &objs {
            let drop = match obj.block {
                0 => obj.slot > 0,
                1 => obj.slot == 0,
                _ => obj.slot >= 16,
            };
            if drop {
                pool.deallocate(*obj, true).unwrap();
            }
        }
        pool.clean(Duration::from_secs(3600), 0);
        assert_eq!(pool.with_space, vec![0, 2, 1]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc,
        Free(usize, bool),
        Clean(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            5 => Just(Op::Alloc),
            4 => (any::<usize>(), any::<bool>()).prop_map(|(i, a)| Op::Free(i, a)),
            1 => (0u64..3).prop_map(Op::Clean),
        ]
    }

    /// Chunk indices on the space stack, and the chunks that actually have
    /// room, both sorted.
    fn space_sets(pool: &ChunkedPool) -> (Vec<u32>, Vec<u32>) {
        let mut stacked = pool.with_space.clone();
        stacked.sort_unstable();
        let mut expected: Vec<u32> = pool
            .order
            .iter()
            .copied()
            .filter(|&block| {
                pool.entries[block as usize]
                    .chunk
                    .as_ref()
                    .is_some_and(Chunk::has_free_slot)
            })
            .collect();
        expected.sort_unstable();
        (stacked, expected)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The space stack always lists exactly the chunks with free slots,
        /// and the pool grows only when no cached or chunk slot is left.
        #[test]
        fn space_stack_tracks_chunks(
            cache_limit in 0usize..8,
            ops in prop::collection::vec(op(), 1..300),
        ) {
            let (mut pool, clock) = pool_with(1024, cache_limit);
            let mut live = Vec::new();
            for op in ops {
                match op {
                    Op::Alloc => {
                        let spare = pool.cached_count() + pool.chunk_free_count();
                        let chunks = pool.chunk_count();
                        live.push(pool.allocate());
                        if spare > 0 {
                            prop_assert_eq!(pool.chunk_count(), chunks);
                        }
                    }
                    Op::Free(index, aggressive) if !live.is_empty() => {
                        let obj = live.swap_remove(index % live.len());
                        prop_assert!(pool.deallocate(obj, aggressive).is_ok());
                    }
                    Op::Free(..) => {}
                    Op::Clean(secs) => {
                        clock.advance(Duration::from_secs(secs));
                        pool.clean(Duration::from_secs(1), 0);
                    }
                }
                let (stacked, expected) = space_sets(&pool);
                prop_assert_eq!(stacked, expected);
                prop_assert_eq!(pool.in_use_count(), live.len());
            }
        }
    }
}
