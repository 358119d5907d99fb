//! A chunk: one contiguous allocation split into equal object slots.

use std::time::{Duration, Instant};

use crate::config::ChunkLayout;

/// Where a slot currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// On the chunk's own free list.
    Free,
    /// Freed into the pool-level cache, not yet reconciled.
    Cached,
    /// Lent to a caller.
    CheckedOut,
}

pub(crate) struct Chunk {
    storage: Box<[u8]>,
    states: Box<[SlotState]>,
    free: Vec<u16>,
    object_size: usize,
    seq: u64,
    last_put: Instant,
    idle_since: Option<Instant>,
}

impl Chunk {
    /// Allocate a chunk with every slot free.
    pub(crate) fn new(layout: ChunkLayout, object_size: usize, seq: u64, now: Instant) -> Self {
        let capacity = layout.capacity;
        Self {
            storage: vec![0u8; layout.bytes].into_boxed_slice(),
            states: vec![SlotState::Free; usize::from(capacity)].into_boxed_slice(),
            // Reversed so slot 0 is handed out first.
            free: (0..capacity).rev().collect(),
            object_size,
            seq,
            last_put: now,
            idle_since: Some(now),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.states.len()
    }

    /// Slots not on the chunk free list (checked out or cached).
    pub(crate) fn in_use(&self) -> usize {
        self.capacity() - self.free.len()
    }

    pub(crate) fn is_free(&self) -> bool {
        self.free.len() == self.capacity()
    }

    /// Whether the chunk's own free list has a slot to hand out.
    pub(crate) fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn state(&self, slot: u16) -> Option<SlotState> {
        self.states.get(usize::from(slot)).copied()
    }

    /// Pop a slot off the chunk free list.
    pub(crate) fn take(&mut self) -> Option<u16> {
        let slot = self.free.pop()?;
        self.states[usize::from(slot)] = SlotState::CheckedOut;
        self.idle_since = None;
        Some(slot)
    }

    /// Hand a cached slot back out.
    pub(crate) fn take_cached(&mut self, slot: u16) {
        debug_assert_eq!(self.state(slot), Some(SlotState::Cached));
        self.states[usize::from(slot)] = SlotState::CheckedOut;
    }

    /// Park a freed slot in the pool cache.
    pub(crate) fn mark_cached(&mut self, slot: u16) {
        self.states[usize::from(slot)] = SlotState::Cached;
    }

    /// Return a slot to the chunk free list. `freed_at` is when the caller
    /// released it, which may predate reconciliation.
    pub(crate) fn put(&mut self, slot: u16, freed_at: Instant) {
        debug_assert_ne!(self.state(slot), Some(SlotState::Free));
        self.states[usize::from(slot)] = SlotState::Free;
        self.free.push(slot);
        self.last_put = self.last_put.max(freed_at);
        if self.is_free() {
            self.idle_since = Some(self.last_put);
        }
    }

    /// How long the chunk has been wholly free, if it is.
    pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.idle_since.map(|since| now.saturating_duration_since(since))
    }

    pub(crate) fn slot_bytes(&self, slot: u16) -> &[u8] {
        let start = usize::from(slot) * self.object_size;
        &self.storage[start..start + self.object_size]
    }

    pub(crate) fn slot_bytes_mut(&mut self, slot: u16) -> &mut [u8] {
        let start = usize::from(slot) * self.object_size;
        &mut self.storage[start..start + self.object_size]
    }
}
