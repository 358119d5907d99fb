//! Allocation meters: gauges with high-water marks and cumulative volumes.
//!
//! Each pool updates its `PoolMeter` inline with every alloc and free. The
//! registry folds all pool meters into one process-wide total on flush.

use serde::Serialize;

/// A gauge with a high-water mark. Levels are in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Meter {
    level: u64,
    hwater: u64,
}

impl Meter {
    /// Current level.
    #[must_use]
    pub fn level(&self) -> u64 {
        self.level
    }

    /// Highest level observed since the meter was created.
    #[must_use]
    pub fn hwater(&self) -> u64 {
        self.hwater
    }

    /// Set the level, raising the high-water mark if needed.
    pub fn set(&mut self, level: u64) {
        self.level = level;
        self.hwater = self.hwater.max(level);
    }

    /// Raise the level.
    pub fn add(&mut self, amount: u64) {
        self.set(self.level + amount);
    }

    /// Keep the larger of both high-water marks.
    pub(crate) fn keep_hwater(&mut self, previous: &Meter) {
        self.hwater = self.hwater.max(previous.hwater);
    }
}

/// Cumulative call volume: number of calls and bytes they covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Volume {
    /// Number of calls.
    pub count: u64,
    /// Bytes covered by those calls.
    pub bytes: u64,
}

impl Volume {
    fn record(&mut self, calls: u64, object_size: usize) {
        self.count += calls;
        self.bytes += calls * object_size as u64;
    }

    fn merge(&mut self, other: &Volume) {
        self.count += other.count;
        self.bytes += other.bytes;
    }
}

/// Per-call counters accumulated between meter flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounters {
    /// `alloc` calls since the last flush.
    pub alloc_calls: u64,
    /// `free_one` calls since the last flush.
    pub free_calls: u64,
    /// Frees kept in the free-list cache since the last flush.
    pub saved_calls: u64,
}

/// Usage meter for one pool, or the process-wide total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMeter {
    /// Bytes obtained from the system allocator.
    pub alloc: Meter,
    /// Bytes checked out to callers.
    pub inuse: Meter,
    /// Bytes held but not checked out.
    pub idle: Meter,
    /// Cumulative allocations.
    pub gb_allocated: Volume,
    /// Cumulative frees kept in the free-list cache.
    pub gb_saved: Volume,
    /// Cumulative frees.
    pub gb_freed: Volume,
}

impl PoolMeter {
    /// Move pending call counters into the cumulative volumes and reset them.
    pub fn fold_calls(&mut self, calls: &mut CallCounters, object_size: usize) {
        self.gb_allocated.record(calls.alloc_calls, object_size);
        self.gb_freed.record(calls.free_calls, object_size);
        self.gb_saved.record(calls.saved_calls, object_size);
        *calls = CallCounters::default();
    }

    /// Add another meter's levels and volumes to this one.
    pub fn accumulate(&mut self, other: &PoolMeter) {
        self.alloc.add(other.alloc.level());
        self.inuse.add(other.inuse.level());
        self.idle.add(other.idle.level());
        self.gb_allocated.merge(&other.gb_allocated);
        self.gb_saved.merge(&other.gb_saved);
        self.gb_freed.merge(&other.gb_freed);
    }

    /// Carry the high-water marks of an earlier total into this one.
    pub(crate) fn keep_hwater(&mut self, previous: &PoolMeter) {
        self.alloc.keep_hwater(&previous.alloc);
        self.inuse.keep_hwater(&previous.inuse);
        self.idle.keep_hwater(&previous.idle);
    }
}
