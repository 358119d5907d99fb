//! Report output: text table or JSON.

use std::io::{self, Write};

use serde::Serialize;

use mempool_core::PoolsReport;

use crate::workload::SimulationSummary;

/// Everything the simulator prints at the end of a run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Workload summary.
    pub simulation: SimulationSummary,
    /// Pool statistics.
    pub pools: PoolsReport,
}

/// Format a byte count with a binary unit.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Write the report as pretty JSON.
pub fn write_json(report: &RunReport, out: &mut dyn Write) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)
}

/// Write the one-line summary used in quiet mode.
pub fn write_summary(report: &RunReport, out: &mut dyn Write) -> io::Result<()> {
    let total = &report.pools.total;
    writeln!(
        out,
        "allocs={} frees={} live={} inuse={} idle={} released={}",
        report.simulation.allocations,
        report.simulation.frees,
        report.simulation.live,
        format_bytes(total.inuse.level()),
        format_bytes(total.idle.level()),
        format_bytes(report.simulation.released_bytes as u64),
    )
}

/// Write the per-pool table followed by totals.
#[allow(clippy::cast_precision_loss)]
pub fn write_table(report: &RunReport, verbose: bool, out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "{:<30} {:>6} {:>7} {:>8} {:>11} {:>11} {:>10}",
        "Pool", "Size", "Chunks", "InUse", "Allocated", "Idle", "Saved%"
    )?;
    writeln!(out, "{:-<89}", "")?;
    for pool in report.pools.by_footprint() {
        let saved_pct = if pool.frees == 0 {
            0.0
        } else {
            pool.saved as f64 * 100.0 / pool.frees as f64
        };
        let chunks = if pool.chunked {
            pool.chunks.to_string()
        } else {
            "-".to_string()
        };
        writeln!(
            out,
            "{:<30} {:>6} {:>7} {:>8} {:>11} {:>11} {:>9.1}%",
            pool.label,
            pool.object_size,
            chunks,
            pool.in_use,
            format_bytes(pool.allocated_bytes as u64),
            format_bytes(pool.idle_bytes as u64),
            saved_pct,
        )?;
        if verbose {
            writeln!(
                out,
                "{:<30} allocs={} frees={} cached={} capacity/chunk={} peak in-use={}",
                "",
                pool.allocations,
                pool.frees,
                pool.cached,
                pool.chunk_capacity,
                format_bytes(pool.inuse_hwater_bytes),
            )?;
        }
    }

    let total = &report.pools.total;
    writeln!(out, "{:-<89}", "")?;
    writeln!(
        out,
        "Total: allocated {} (peak {}), in use {}, idle {} / limit {}",
        format_bytes(total.alloc.level()),
        format_bytes(total.alloc.hwater()),
        format_bytes(total.inuse.level()),
        format_bytes(total.idle.level()),
        format_bytes(report.pools.idle_limit as u64),
    )?;
    writeln!(
        out,
        "Sweeps: {}, released {} chunks ({})",
        report.simulation.sweeps,
        report.simulation.released_chunks,
        format_bytes(report.simulation.released_bytes as u64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_core::MemPools;

    fn sample() -> RunReport {
        let pools = MemPools::new();
        let pool = pools.create("HttpHeaderEntry", 48).unwrap();
        let obj = pool.alloc();
        let _keep = pool.alloc();
        pool.free_one(obj).unwrap();
        pools.flush_meters();
        RunReport {
            simulation: SimulationSummary {
                allocations: 2,
                frees: 1,
                live: 1,
                ..SimulationSummary::default()
            },
            pools: pools.report(),
        }
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(2 << 20), "2.0 MiB");
        assert_eq!(format_bytes(3 << 30), "3.0 GiB");
    }

    #[test]
    fn table_lists_pools() {
        let mut buf = Vec::new();
        write_table(&sample(), true, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("HttpHeaderEntry"));
        assert!(text.contains("100.0%"));
        assert!(text.contains("limit 2.0 MiB"));
        assert!(text.contains("cached=1"));
    }

    #[test]
    fn json_is_parseable() {
        let mut buf = Vec::new();
        write_json(&sample(), &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["simulation"]["allocations"], 2);
        assert_eq!(value["pools"]["pools"][0]["in_use"], 1);
        assert_eq!(value["pools"]["total"]["gb_freed"]["count"], 1);
    }

    #[test]
    fn summary_is_one_line() {
        let mut buf = Vec::new();
        write_summary(&sample(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("allocs=2 frees=1 live=1"));
    }
}
