//! Object classes a caching proxy keeps in pools, used to shape the workload.

use anyhow::Result;

use mempool_core::{MemPools, PoolClass, PoolHandle};

/// Negotiate-auth request state: helper server, two credential blobs, the
/// waiting flag and the owning request.
pub struct NegotiateUserRequest;

impl PoolClass for NegotiateUserRequest {
    const LABEL: &'static str = "Auth::Negotiate::UserRequest";
    const OBJECT_SIZE: usize = 96;
}

/// One parsed HTTP header field.
pub struct HttpHeaderEntry;

impl PoolClass for HttpHeaderEntry {
    const LABEL: &'static str = "HttpHeaderEntry";
    const OBJECT_SIZE: usize = 48;
}

/// Per-connection client state.
pub struct ConnStateData;

impl PoolClass for ConnStateData {
    const LABEL: &'static str = "ConnStateData";
    const OBJECT_SIZE: usize = 512;
}

/// 4 KiB I/O buffer.
pub struct MemBuf4K;

impl PoolClass for MemBuf4K {
    const LABEL: &'static str = "4KB Buffer";
    const OBJECT_SIZE: usize = 4096;
}

/// A pool in the workload and how often the simulator touches it.
pub struct WorkloadClass {
    /// Pool handle.
    pub pool: PoolHandle,
    /// Relative share of operations.
    pub weight: u32,
    /// Objects the workload tries to keep alive at steady state.
    pub target_live: usize,
}

/// Register the standard classes with their workload weights.
pub fn register_all(pools: &MemPools) -> Result<Vec<WorkloadClass>> {
    Ok(vec![
        WorkloadClass {
            pool: pools.create_for::<HttpHeaderEntry>()?,
            weight: 8,
            target_live: 4_000,
        },
        WorkloadClass {
            pool: pools.create_for::<NegotiateUserRequest>()?,
            weight: 2,
            target_live: 300,
        },
        WorkloadClass {
            pool: pools.create_for::<ConnStateData>()?,
            weight: 2,
            target_live: 500,
        },
        WorkloadClass {
            pool: pools.create_for::<MemBuf4K>()?,
            weight: 1,
            target_live: 200,
        },
    ])
}
