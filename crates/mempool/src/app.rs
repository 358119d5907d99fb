//! Application entry point and dispatch.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap_complete::generate;
use tracing::info;

use mempool_core::{ManualClock, MemPools};

use crate::classes::register_all;
use crate::config::AppConfig;
use crate::report::{write_json, write_summary, write_table, RunReport};
use crate::workload::{Simulation, SimulationParams};

/// Run the application.
pub fn run(config: &AppConfig) -> Result<()> {
    if let Some(shell) = config.completion {
        let mut cmd = <AppConfig as clap::CommandFactory>::command();
        generate(shell, &mut cmd, "mempool", &mut io::stdout());
        return Ok(());
    }

    let report = simulate(config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if config.json {
        write_json(&report, &mut out)?;
    } else if config.quiet {
        write_summary(&report, &mut out)?;
    } else {
        write_table(&report, config.verbose, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

/// Build the registry, run the workload and collect the report.
pub fn simulate(config: &AppConfig) -> Result<RunReport> {
    let pools_config = config.pools_config()?;
    let params = SimulationParams {
        ticks: config.ticks,
        ops_per_tick: config.ops_per_tick,
        tick: config.tick_duration()?,
        clean_every: config.clean_every,
        max_age: config.max_age_duration()?,
        drain: config.drain,
        seed: config.seed,
    };

    let clock = Arc::new(ManualClock::new());
    let pools = MemPools::with_clock(pools_config, clock.clone())?;
    info!(
        idle_limit = pools.idle_limit(),
        chunked = pools.default_pool_chunking(),
        ticks = params.ticks,
        "starting simulation"
    );

    let classes = register_all(&pools)?;
    let simulation = Simulation::new(&pools, &clock, classes, params.seed).run(&params)?;

    Ok(RunReport {
        simulation,
        pools: pools.report(),
    })
}
