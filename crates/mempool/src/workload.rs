//! Deterministic alloc/free churn driven on a simulated clock.
//!
//! The simulator stands in for the proxy's event loop: it allocates and
//! frees objects inline, advances time tick by tick, and runs the pool
//! sweep on a fixed cadence the way the host scheduler would.

use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use mempool_core::{ManualClock, MemPools, ObjectRef};

use crate::classes::WorkloadClass;

/// Workload shape.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    /// Number of ticks.
    pub ticks: u64,
    /// Pool operations per tick.
    pub ops_per_tick: u64,
    /// Simulated time per tick.
    pub tick: Duration,
    /// Sweep cadence in ticks (0 disables periodic sweeps).
    pub clean_every: u64,
    /// Sweep age threshold.
    pub max_age: Duration,
    /// Free everything and sweep once more at the end.
    pub drain: bool,
    /// RNG seed.
    pub seed: u64,
}

/// What the simulation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    /// Objects allocated.
    pub allocations: u64,
    /// Objects freed.
    pub frees: u64,
    /// Sweeps run.
    pub sweeps: u64,
    /// Chunks released across all sweeps.
    pub released_chunks: usize,
    /// Bytes released across all sweeps.
    pub released_bytes: usize,
    /// Objects still live at the end.
    pub live: usize,
}

/// Churn simulator over a set of pool classes.
pub struct Simulation<'a> {
    pools: &'a MemPools,
    clock: &'a ManualClock,
    classes: Vec<WorkloadClass>,
    live: Vec<Vec<ObjectRef>>,
    rng: StdRng,
    summary: SimulationSummary,
}

impl<'a> Simulation<'a> {
    /// Create a simulator. `clock` must be the clock `pools` was built with.
    #[must_use]
    pub fn new(
        pools: &'a MemPools,
        clock: &'a ManualClock,
        classes: Vec<WorkloadClass>,
        seed: u64,
    ) -> Self {
        let live = classes.iter().map(|_| Vec::new()).collect();
        Self {
            pools,
            clock,
            classes,
            live,
            rng: StdRng::seed_from_u64(seed),
            summary: SimulationSummary::default(),
        }
    }

    /// Run the workload to completion.
    pub fn run(mut self, params: &SimulationParams) -> Result<SimulationSummary> {
        let total_weight: u32 = self.classes.iter().map(|c| c.weight).sum();
        if total_weight == 0 {
            return Ok(self.summary);
        }

        for tick in 1..=params.ticks {
            // Traffic drops to a quarter for the second half of the run.
            let load_divisor = if tick * 2 > params.ticks { 4 } else { 1 };
            for _ in 0..params.ops_per_tick {
                let class = self.pick(total_weight);
                let target = self.classes[class].target_live / load_divisor;
                let alloc_bias = if self.live[class].len() < target { 0.6 } else { 0.4 };
                if self.rng.random_bool(alloc_bias) {
                    self.alloc(class)?;
                } else {
                    self.free_random(class)?;
                }
            }

            self.clock.advance(params.tick);
            if params.clean_every > 0 && tick % params.clean_every == 0 {
                self.sweep(params.max_age, tick);
            }
        }

        if params.drain {
            for class in 0..self.classes.len() {
                while let Some(obj) = self.live[class].pop() {
                    self.classes[class].pool.free_one(obj)?;
                    self.summary.frees += 1;
                }
            }
            self.clock.advance(params.max_age);
            self.sweep(params.max_age, params.ticks);
        }

        self.pools.flush_meters();
        self.summary.live = self.live.iter().map(Vec::len).sum();
        Ok(self.summary)
    }

    fn pick(&mut self, total_weight: u32) -> usize {
        let mut roll = self.rng.random_range(0..total_weight);
        for (index, class) in self.classes.iter().enumerate() {
            if roll < class.weight {
                return index;
            }
            roll -= class.weight;
        }
        self.classes.len() - 1
    }

    #[allow(clippy::cast_possible_truncation)]
    fn alloc(&mut self, class: usize) -> Result<()> {
        let pool = &self.classes[class].pool;
        let obj = pool.alloc();
        // Stamp the object so stale data would show up in a debugger.
        pool.with_bytes_mut(obj, |bytes| bytes[0] = class as u8)?;
        self.live[class].push(obj);
        self.summary.allocations += 1;
        Ok(())
    }

    fn free_random(&mut self, class: usize) -> Result<()> {
        let live = &mut self.live[class];
        if live.is_empty() {
            return Ok(());
        }
        let index = self.rng.random_range(0..live.len());
        let obj = live.swap_remove(index);
        self.classes[class].pool.free_one(obj)?;
        self.summary.frees += 1;
        Ok(())
    }

    fn sweep(&mut self, max_age: Duration, tick: u64) {
        let report = self.pools.clean_report(max_age);
        self.summary.sweeps += 1;
        self.summary.released_chunks += report.released_chunks;
        self.summary.released_bytes += report.released_bytes;
        debug!(
            tick,
            released_chunks = report.released_chunks,
            idle_bytes = self.pools.idle_bytes(),
            "sweep"
        );
    }
}
