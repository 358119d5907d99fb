//! Serializable statistics snapshots for reporting.

use serde::Serialize;

use crate::meter::PoolMeter;

/// Point-in-time view of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pool label.
    pub label: String,
    /// Object size in bytes.
    pub object_size: usize,
    /// Whether the pool is chunked.
    pub chunked: bool,
    /// Live chunks.
    pub chunks: usize,
    /// Objects per chunk.
    pub chunk_capacity: usize,
    /// Objects checked out.
    pub in_use: usize,
    /// Freed slots in the free-list cache, not yet back on their chunk.
    pub cached: usize,
    /// Slots on chunk free lists.
    pub chunk_free: usize,
    /// Bytes held but not checked out.
    pub idle_bytes: usize,
    /// Bytes held from the system allocator.
    pub allocated_bytes: usize,
    /// Allocations since the pool was created.
    pub allocations: u64,
    /// Frees since the pool was created.
    pub frees: u64,
    /// Frees kept in the free-list cache since the pool was created.
    pub saved: u64,
    /// Highest in-use byte count observed.
    pub inuse_hwater_bytes: u64,
}

/// Snapshot of every pool plus the process-wide total as of the last flush.
#[derive(Debug, Clone, Serialize)]
pub struct PoolsReport {
    /// Configured idle limit in bytes.
    pub idle_limit: usize,
    /// Per-pool snapshots, in creation order.
    pub pools: Vec<PoolStats>,
    /// Rolled-up total meter.
    pub total: PoolMeter,
}

impl PoolsReport {
    /// Pools sorted by allocated bytes, largest first.
    #[must_use]
    pub fn by_footprint(&self) -> Vec<&PoolStats> {
        let mut pools: Vec<&PoolStats> = self.pools.iter().collect();
        pools.sort_by(|a, b| b.allocated_bytes.cmp(&a.allocated_bytes));
        pools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(label: &str, allocated_bytes: usize) -> PoolStats {
        PoolStats {
            label: label.into(),
            object_size: 8,
            chunked: true,
            chunks: 1,
            chunk_capacity: 512,
            in_use: 0,
            cached: 0,
            chunk_free: 512,
            idle_bytes: allocated_bytes,
            allocated_bytes,
            allocations: 0,
            frees: 0,
            saved: 0,
            inuse_hwater_bytes: 0,
        }
    }

    #[test]
    fn by_footprint_orders_largest_first() {
        let report = PoolsReport {
            idle_limit: 0,
            pools: vec![stats("a", 10), stats("b", 30), stats("c", 20)],
            total: PoolMeter::default(),
        };
        let labels: Vec<_> = report.by_footprint().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["b", "c", "a"]);
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(stats("buf", 4096)).unwrap();
        assert_eq!(json["label"], "buf");
        assert_eq!(json["allocated_bytes"], 4096);
    }
}
