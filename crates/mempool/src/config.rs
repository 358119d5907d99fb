//! Application configuration from CLI flags, environment and config file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use mempool_core::{PoolError, PoolsConfig};

/// mempool: fixed-size object pool churn simulator.
#[derive(Parser, Debug)]
#[command(name = "mempool", version, about)]
pub struct AppConfig {
    /// JSON file with pool settings (idle limit, chunk sizing, ...).
    #[arg(long, env = "MEMPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Idle-memory budget (e.g. "2M", "512K", "0"). Overrides the file.
    #[arg(long, env = "MEMPOOL_IDLE_LIMIT", allow_hyphen_values = true)]
    pub idle_limit: Option<String>,

    /// Use direct (non-chunked) pools.
    #[arg(long)]
    pub direct: bool,

    /// Number of simulated ticks.
    #[arg(long, default_value = "120")]
    pub ticks: u64,

    /// Pool operations per tick.
    #[arg(long, default_value = "2000")]
    pub ops_per_tick: u64,

    /// Simulated time per tick (e.g. "1s", "500ms").
    #[arg(long, default_value = "1s")]
    pub tick: String,

    /// Run the cleanup sweep every N ticks.
    #[arg(long, default_value = "30")]
    pub clean_every: u64,

    /// Release chunks idle for at least this long (e.g. "30s", "2m").
    #[arg(long, default_value = "30s")]
    pub max_age: String,

    /// Free every live object at the end and run a final sweep.
    #[arg(long)]
    pub drain: bool,

    /// Workload seed.
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (summary line only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate shell completion.
    #[arg(long, value_enum)]
    pub completion: Option<clap_complete::Shell>,
}

impl AppConfig {
    /// Parse CLI arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Build the registry configuration: file first, then flag overrides.
    pub fn pools_config(&self) -> Result<PoolsConfig> {
        let mut pools = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => PoolsConfig::default(),
        };
        if let Some(limit) = &self.idle_limit {
            let bytes = parse_size(limit)?;
            pools.idle_limit =
                usize::try_from(bytes).map_err(|_| PoolError::NegativeIdleLimit(bytes))?;
        }
        if self.direct {
            pools.default_chunked = false;
        }
        pools.validate()?;
        Ok(pools)
    }

    /// Simulated duration of one tick.
    pub fn tick_duration(&self) -> Result<Duration> {
        parse_duration(&self.tick).with_context(|| format!("invalid tick: {}", self.tick))
    }

    /// Sweep age threshold.
    pub fn max_age_duration(&self) -> Result<Duration> {
        parse_duration(&self.max_age).with_context(|| format!("invalid max age: {}", self.max_age))
    }
}

/// Parse a duration string like "5m", "1h", "30s", "250ms".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let n: u64 = ms.parse().ok()?;
        Some(Duration::from_millis(n))
    } else if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().ok()?;
        Some(Duration::from_secs(n.checked_mul(60)?))
    } else if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().ok()?;
        Some(Duration::from_secs(n.checked_mul(3600)?))
    } else if let Some(secs) = s.strip_suffix('s') {
        let n: u64 = secs.parse().ok()?;
        Some(Duration::from_secs(n))
    } else {
        let n: u64 = s.parse().ok()?;
        Some(Duration::from_secs(n))
    }
}

/// Parse a size string (e.g. "2M", "512K", "1G", "4096"). The result is
/// signed so that negative budgets reach the registry and are rejected there.
///
/// # Errors
///
/// Returns an error if the number cannot be parsed.
pub fn parse_size(s: &str) -> Result<i64> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s, 1)
    };

    let value: i64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("invalid size: {s}"))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("size out of range: {s}"))
}
