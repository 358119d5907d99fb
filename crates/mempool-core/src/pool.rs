//! The allocator contract shared by every pool variant.
//!
//! `Pool` owns the bookkeeping common to all variants (label, object size,
//! call counters, meter) and forwards the actual memory management to a
//! `PoolStrategy`. `PoolHandle` is the cloneable, lock-guarded view handed
//! to callers by the registry.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::meter::{CallCounters, PoolMeter};
use crate::registry::IdleBudget;
use crate::stats::PoolStats;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique pool identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u32);

impl PoolId {
    pub(crate) fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to one pooled object.
///
/// Plays the role of an object pointer: it is `Copy`, and every use is
/// validated against the owning pool, so misuse is reported instead of
/// corrupting memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub(crate) pool: PoolId,
    pub(crate) block: u32,
    pub(crate) generation: u32,
    pub(crate) slot: u16,
}

impl ObjectRef {
    pub(crate) fn new(pool: PoolId, block: u32, generation: u32, slot: u16) -> Self {
        Self {
            pool,
            block,
            generation,
            slot,
        }
    }

    /// Pool the object was allocated from.
    #[must_use]
    pub fn pool(&self) -> PoolId {
        self.pool
    }
}

/// Why a strategy refused an object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFault {
    /// The slot exists but is not checked out.
    NotCheckedOut,
    /// The backing chunk or block has been released.
    Stale,
    /// No such chunk or slot.
    OutOfRange,
}

/// What `deallocate` did with an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freed {
    /// Kept in the pool-level free-list cache.
    Cached,
    /// Returned to its chunk free list or to the system allocator.
    Returned,
}

/// Result of cleaning one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOutcome {
    /// Chunks returned to the system allocator.
    pub released_chunks: usize,
    /// Bytes returned to the system allocator.
    pub released_bytes: usize,
}

/// Memory management behind a pool. Implemented by the chunked and direct
/// variants; selected once, when the pool is created.
pub trait PoolStrategy: Send {
    /// Hand out one object. Aborts the process if memory is exhausted.
    fn allocate(&mut self) -> ObjectRef;

    /// Take back a checked-out object. `aggressive` asks the strategy to
    /// prefer returning memory over caching it.
    fn deallocate(&mut self, obj: ObjectRef, aggressive: bool) -> Result<Freed, SlotFault>;

    /// Bytes of a checked-out object.
    fn bytes(&self, obj: ObjectRef) -> Result<&[u8], SlotFault>;

    /// Mutable bytes of a checked-out object.
    fn bytes_mut(&mut self, obj: ObjectRef) -> Result<&mut [u8], SlotFault>;

    /// Objects currently checked out.
    fn in_use_count(&self) -> usize;

    /// Bytes held from the system allocator.
    fn allocated_bytes(&self) -> usize;

    /// Bytes held but not checked out.
    fn idle_bytes(&self) -> usize;

    /// Reconcile caches and release memory idle for at least `max_age`,
    /// keeping up to `keep_free` wholly free chunks.
    fn clean(&mut self, max_age: Duration, keep_free: usize) -> CleanOutcome;

    /// Live chunks (zero for variants without chunks).
    fn chunk_count(&self) -> usize {
        0
    }

    /// Objects per chunk (zero for variants without chunks).
    fn chunk_capacity(&self) -> usize {
        0
    }

    /// Freed slots waiting in the free-list cache.
    fn cached_count(&self) -> usize {
        0
    }

    /// Slots on the chunks' own free lists.
    fn chunk_free_count(&self) -> usize {
        0
    }

    /// Whether this is the chunked variant.
    fn is_chunked(&self) -> bool;
}

/// A pool of fixed-size objects.
pub struct Pool {
    id: PoolId,
    label: String,
    object_size: usize,
    strategy: Box<dyn PoolStrategy>,
    meter: PoolMeter,
    calls: CallCounters,
    budget: Arc<IdleBudget>,
    min_free_chunks: usize,
}

impl Pool {
    pub(crate) fn new(
        id: PoolId,
        label: &str,
        object_size: usize,
        strategy: Box<dyn PoolStrategy>,
        budget: Arc<IdleBudget>,
        min_free_chunks: usize,
    ) -> Self {
        Self {
            id,
            label: label.to_owned(),
            object_size,
            strategy,
            meter: PoolMeter::default(),
            calls: CallCounters::default(),
            budget,
            min_free_chunks,
        }
    }

    /// Allocate one object.
    pub fn alloc(&mut self) -> ObjectRef {
        self.calls.alloc_calls += 1;
        let obj = self.strategy.allocate();
        self.sync_meter();
        obj
    }

    /// Return one object to the pool.
    pub fn free_one(&mut self, obj: ObjectRef) -> Result<(), PoolError> {
        self.owns(obj)?;
        let aggressive = self.idle_trigger(0);
        let freed = self
            .strategy
            .deallocate(obj, aggressive)
            .map_err(|fault| self.fault(fault, true))?;
        self.calls.free_calls += 1;
        if freed == Freed::Cached {
            self.calls.saved_calls += 1;
        }
        self.sync_meter();
        Ok(())
    }

    /// Whether idle bytes exceed this pool's share of the idle limit,
    /// scaled up by `2^shift`.
    #[must_use]
    pub fn idle_trigger(&self, shift: u32) -> bool {
        self.strategy.idle_bytes() > self.budget.threshold(shift)
    }

    /// Objects currently checked out.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.strategy.in_use_count()
    }

    /// Size of every object in this pool.
    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Human-readable pool label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pool identifier.
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Whether the pool uses the chunked strategy.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.strategy.is_chunked()
    }

    /// Current meter.
    #[must_use]
    pub fn meter(&self) -> &PoolMeter {
        &self.meter
    }

    /// Calls recorded since the last meter flush.
    #[must_use]
    pub fn calls(&self) -> CallCounters {
        self.calls
    }

    /// Bytes held from the system but not checked out.
    #[must_use]
    pub fn idle_bytes(&self) -> usize {
        self.strategy.idle_bytes()
    }

    /// Live chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.strategy.chunk_count()
    }

    /// Fold pending call counters into the cumulative meter volumes.
    pub fn flush_meters(&mut self) {
        self.meter.fold_calls(&mut self.calls, self.object_size);
    }

    /// Reconcile and release memory idle for at least `max_age`.
    pub fn clean(&mut self, max_age: Duration) -> CleanOutcome {
        self.clean_keeping(max_age, self.min_free_chunks)
    }

    pub(crate) fn clean_keeping(&mut self, max_age: Duration, keep_free: usize) -> CleanOutcome {
        let outcome = self.strategy.clean(max_age, keep_free);
        self.sync_meter();
        if outcome.released_chunks > 0 {
            debug!(
                pool = %self.label,
                chunks = outcome.released_chunks,
                bytes = outcome.released_bytes,
                "released idle chunks"
            );
        }
        outcome
    }

    /// Read the bytes of a checked-out object.
    pub fn with_bytes<R>(&self, obj: ObjectRef, f: impl FnOnce(&[u8]) -> R) -> Result<R, PoolError> {
        self.owns(obj)?;
        let bytes = self
            .strategy
            .bytes(obj)
            .map_err(|fault| self.fault(fault, false))?;
        Ok(f(bytes))
    }

    /// Write the bytes of a checked-out object.
    pub fn with_bytes_mut<R>(
        &mut self,
        obj: ObjectRef,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, PoolError> {
        self.owns(obj)?;
        match self.strategy.bytes_mut(obj) {
            Ok(bytes) => Ok(f(bytes)),
            Err(fault) => Err(self.fault(fault, false)),
        }
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            label: self.label.clone(),
            object_size: self.object_size,
            chunked: self.is_chunked(),
            chunks: self.strategy.chunk_count(),
            chunk_capacity: self.strategy.chunk_capacity(),
            in_use: self.in_use_count(),
            cached: self.strategy.cached_count(),
            chunk_free: self.strategy.chunk_free_count(),
            idle_bytes: self.strategy.idle_bytes(),
            allocated_bytes: self.strategy.allocated_bytes(),
            allocations: self.meter.gb_allocated.count + self.calls.alloc_calls,
            frees: self.meter.gb_freed.count + self.calls.free_calls,
            saved: self.meter.gb_saved.count + self.calls.saved_calls,
            inuse_hwater_bytes: self.meter.inuse.hwater(),
        }
    }

    fn owns(&self, obj: ObjectRef) -> Result<(), PoolError> {
        if obj.pool == self.id {
            return Ok(());
        }
        warn!(pool = %self.label, expected = %self.id, found = %obj.pool, "foreign object");
        Err(PoolError::ForeignObject {
            expected: self.id,
            found: obj.pool,
        })
    }

    fn fault(&self, fault: SlotFault, freeing: bool) -> PoolError {
        let label = self.label.clone();
        warn!(pool = %self.label, ?fault, freeing, "rejected object reference");
        match fault {
            SlotFault::NotCheckedOut if freeing => PoolError::DoubleFree { label },
            SlotFault::NotCheckedOut | SlotFault::Stale => PoolError::StaleObject { label },
            SlotFault::OutOfRange => PoolError::InvalidSlot { label },
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sync_meter(&mut self) {
        let in_use = (self.strategy.in_use_count() * self.object_size) as u64;
        self.meter.alloc.set(self.strategy.allocated_bytes() as u64);
        self.meter.inuse.set(in_use);
        self.meter.idle.set(self.strategy.idle_bytes() as u64);
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("object_size", &self.object_size)
            .field("chunked", &self.is_chunked())
            .field("in_use", &self.in_use_count())
            .finish_non_exhaustive()
    }
}

/// Shared, lock-guarded access to one pool.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<Mutex<Pool>>,
    id: PoolId,
    label: Arc<str>,
    object_size: usize,
}

impl PoolHandle {
    pub(crate) fn new(pool: Pool) -> Self {
        Self {
            id: pool.id(),
            label: Arc::from(pool.label()),
            object_size: pool.object_size(),
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Lock the pool for a batch of operations.
    pub fn lock(&self) -> MutexGuard<'_, Pool> {
        self.inner.lock()
    }

    /// Allocate one object.
    pub fn alloc(&self) -> ObjectRef {
        self.inner.lock().alloc()
    }

    /// Return one object to the pool.
    pub fn free_one(&self, obj: ObjectRef) -> Result<(), PoolError> {
        self.inner.lock().free_one(obj)
    }

    /// See [`Pool::idle_trigger`].
    #[must_use]
    pub fn idle_trigger(&self, shift: u32) -> bool {
        self.inner.lock().idle_trigger(shift)
    }

    /// Objects currently checked out.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.inner.lock().in_use_count()
    }

    /// Size of every object in this pool.
    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Pool identifier.
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Pool label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Copy of the current meter.
    #[must_use]
    pub fn meter(&self) -> PoolMeter {
        *self.inner.lock().meter()
    }

    /// See [`Pool::with_bytes`].
    pub fn with_bytes<R>(&self, obj: ObjectRef, f: impl FnOnce(&[u8]) -> R) -> Result<R, PoolError> {
        self.inner.lock().with_bytes(obj, f)
    }

    /// See [`Pool::with_bytes_mut`].
    pub fn with_bytes_mut<R>(
        &self,
        obj: ObjectRef,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, PoolError> {
        self.inner.lock().with_bytes_mut(obj, f)
    }

    /// See [`Pool::clean`].
    pub fn clean(&self, max_age: Duration) -> CleanOutcome {
        self.inner.lock().clean(max_age)
    }

    /// See [`Pool::flush_meters`].
    pub fn flush_meters(&self) {
        self.inner.lock().flush_meters();
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// Whether both handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &PoolHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("object_size", &self.object_size)
            .finish_non_exhaustive()
    }
}
