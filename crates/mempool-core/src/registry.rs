//! Pool registry: owner of every pool, the idle budget and the periodic sweep.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chunked::{ChunkedOptions, ChunkedPool};
use crate::clock::{Clock, SystemClock};
use crate::config::PoolsConfig;
use crate::constants::SWEEP_SHIFT;
use crate::direct::DirectPool;
use crate::error::PoolError;
use crate::meter::PoolMeter;
use crate::pool::{Pool, PoolHandle, PoolId, PoolStrategy};
use crate::stats::PoolsReport;

/// A type whose instances are stored in a dedicated pool.
///
/// Declaring the label and size once on the type guarantees every request
/// for its pool uses the same `(label, size)` pair.
pub trait PoolClass: Sized {
    /// Pool label.
    const LABEL: &'static str;
    /// Object size; defaults to the in-memory size of the type.
    const OBJECT_SIZE: usize = std::mem::size_of::<Self>();
}

/// Idle-limit state shared between the registry and its pools.
#[derive(Debug)]
pub(crate) struct IdleBudget {
    limit: AtomicUsize,
    pools: AtomicUsize,
}

impl IdleBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            pools: AtomicUsize::new(0),
        }
    }

    /// One pool's fair share of the idle limit, scaled by `2^shift`.
    pub(crate) fn threshold(&self, shift: u32) -> usize {
        let pools = self.pools.load(Ordering::Relaxed).max(1);
        let share = self.limit.load(Ordering::Relaxed) / pools;
        share.saturating_mul(1usize.checked_shl(shift).unwrap_or(usize::MAX))
    }
}

/// Aggregate result of one `clean` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Pools visited.
    pub pools: usize,
    /// Pools over their idle share.
    pub triggered: usize,
    /// Chunks returned to the system allocator.
    pub released_chunks: usize,
    /// Bytes returned to the system allocator.
    pub released_bytes: usize,
}

/// Registry of all pools in the process.
///
/// Create one at start-up and pass it (or an `Arc` of it) to whatever needs
/// pools. The host drives `clean` and `flush_meters` from its own timers.
pub struct MemPools {
    pools: Mutex<Vec<PoolHandle>>,
    budget: Arc<IdleBudget>,
    default_chunked: AtomicBool,
    config: PoolsConfig,
    total: Mutex<PoolMeter>,
    clock: Arc<dyn Clock>,
}

impl MemPools {
    /// Registry with default configuration and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::build(PoolsConfig::default(), Arc::new(SystemClock))
    }

    /// Registry with the given configuration and the system clock.
    pub fn with_config(config: PoolsConfig) -> Result<Self, PoolError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Registry with the given configuration and time source.
    pub fn with_clock(config: PoolsConfig, clock: Arc<dyn Clock>) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: PoolsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pools: Mutex::new(Vec::new()),
            budget: Arc::new(IdleBudget::new(config.idle_limit)),
            default_chunked: AtomicBool::new(config.default_chunked),
            config,
            total: Mutex::new(PoolMeter::default()),
            clock,
        }
    }

    /// Get the pool for `(label, object_size)`, creating it if needed.
    ///
    /// A label may only ever be used with one object size; asking for the
    /// same label with a different size is rejected.
    pub fn create(&self, label: &str, object_size: usize) -> Result<PoolHandle, PoolError> {
        if object_size == 0 {
            warn!(pool = label, "rejected zero-size pool");
            return Err(PoolError::ZeroObjectSize {
                label: label.to_owned(),
            });
        }

        let mut pools = self.pools.lock();
        if let Some(existing) = pools.iter().find(|p| p.label() == label) {
            if existing.object_size() == object_size {
                return Ok(existing.clone());
            }
            warn!(
                pool = label,
                existing = existing.object_size(),
                requested = object_size,
                "rejected pool with conflicting object size"
            );
            return Err(PoolError::LabelSizeConflict {
                label: label.to_owned(),
                existing: existing.object_size(),
                requested: object_size,
            });
        }

        let id = PoolId::next();
        let chunked = self.default_chunked.load(Ordering::Relaxed);
        let strategy: Box<dyn PoolStrategy> = if chunked {
            let layout = self.config.chunk_sizing.layout(object_size);
            let options = ChunkedOptions {
                layout,
                cache_limit: self
                    .config
                    .free_cache_limit
                    .unwrap_or(usize::from(layout.capacity)),
                zero_on_release: self.config.zero_on_release,
            };
            Box::new(ChunkedPool::new(
                id,
                label,
                object_size,
                options,
                Arc::clone(&self.clock),
            ))
        } else {
            Box::new(DirectPool::new(id, object_size))
        };

        let pool = Pool::new(
            id,
            label,
            object_size,
            strategy,
            Arc::clone(&self.budget),
            self.config.min_free_chunks,
        );
        let handle = PoolHandle::new(pool);
        pools.push(handle.clone());
        self.budget.pools.store(pools.len(), Ordering::Relaxed);
        debug!(pool = label, %id, object_size, chunked, "created pool");
        Ok(handle)
    }

    /// Get the pool declared by `T`.
    pub fn create_for<T: PoolClass>(&self) -> Result<PoolHandle, PoolError> {
        self.create(T::LABEL, T::OBJECT_SIZE)
    }

    /// Look up a pool by label.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<PoolHandle> {
        self.pools
            .lock()
            .iter()
            .find(|p| p.label() == label)
            .cloned()
    }

    /// Set the idle-memory budget in bytes. Negative values are rejected.
    pub fn set_idle_limit(&self, bytes: i64) -> Result<(), PoolError> {
        let limit = usize::try_from(bytes).map_err(|_| PoolError::NegativeIdleLimit(bytes))?;
        self.budget.limit.store(limit, Ordering::Relaxed);
        debug!(idle_limit = limit, "idle limit updated");
        Ok(())
    }

    /// Current idle-memory budget in bytes.
    #[must_use]
    pub fn idle_limit(&self) -> usize {
        self.budget.limit.load(Ordering::Relaxed)
    }

    /// Choose the strategy for pools created from now on.
    pub fn set_default_pool_chunking(&self, chunked: bool) {
        self.default_chunked.store(chunked, Ordering::Relaxed);
    }

    /// Strategy used for new pools.
    #[must_use]
    pub fn default_pool_chunking(&self) -> bool {
        self.default_chunked.load(Ordering::Relaxed)
    }

    /// Periodic maintenance: reconcile caches, release chunks idle for at
    /// least `max_age`, and re-sort chunks in every pool.
    pub fn clean(&self, max_age: Duration) {
        let _ = self.clean_report(max_age);
    }

    /// Like [`MemPools::clean`], returning what was released.
    pub fn clean_report(&self, max_age: Duration) -> CleanReport {
        self.flush_meters();

        let over_limit = self.total.lock().idle.level() > self.idle_limit() as u64;
        let shift = if over_limit { 0 } else { SWEEP_SHIFT };

        let mut report = CleanReport::default();
        for handle in self.pools() {
            let mut pool = handle.lock();
            let triggered = pool.idle_trigger(shift);
            let keep_free = if triggered {
                0
            } else {
                self.config.min_free_chunks
            };
            let outcome = pool.clean_keeping(max_age, keep_free);
            report.pools += 1;
            report.triggered += usize::from(triggered);
            report.released_chunks += outcome.released_chunks;
            report.released_bytes += outcome.released_bytes;
        }

        if report.released_chunks > 0 {
            info!(
                pools = report.pools,
                triggered = report.triggered,
                chunks = report.released_chunks,
                bytes = report.released_bytes,
                over_limit,
                "pool sweep released memory"
            );
        } else {
            debug!(pools = report.pools, triggered = report.triggered, "pool sweep");
        }
        report
    }

    /// Fold every pool's counters into its meter and recompute the total.
    pub fn flush_meters(&self) {
        let mut total = PoolMeter::default();
        for handle in self.pools() {
            let mut pool = handle.lock();
            pool.flush_meters();
            total.accumulate(pool.meter());
        }
        let mut current = self.total.lock();
        total.keep_hwater(&current);
        *current = total;
    }

    /// Process-wide total as of the last flush.
    #[must_use]
    pub fn total_meter(&self) -> PoolMeter {
        *self.total.lock()
    }

    /// Handles to all pools, in creation order.
    #[must_use]
    pub fn pools(&self) -> Vec<PoolHandle> {
        self.pools.lock().clone()
    }

    /// Number of pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Bytes held but unused across all pools, read live.
    #[must_use]
    pub fn idle_bytes(&self) -> usize {
        self.pools().iter().map(|p| p.lock().idle_bytes()).sum()
    }

    /// Snapshot of every pool and the total.
    #[must_use]
    pub fn report(&self) -> PoolsReport {
        PoolsReport {
            idle_limit: self.idle_limit(),
            pools: self.pools().iter().map(PoolHandle::stats).collect(),
            total: self.total_meter(),
        }
    }
}

impl Default for MemPools {
    fn default() -> Self {
        Self::new()
    }
}
