//! # mempool-core
//!
//! Fixed-size object pools layered over the system allocator.
//!
//! A [`MemPools`] registry hands out one pool per object type. Chunked pools
//! group objects into page-multiple chunks and cache frees for fast reuse;
//! direct pools forward every call to the system allocator. Both report
//! through the same meters, and the host reclaims idle chunks by calling
//! [`MemPools::clean`] periodically.
//!
//! ```
//! use mempool_core::MemPools;
//!
//! let pools = MemPools::new();
//! let pool = pools.create("request", 64).unwrap();
//! let obj = pool.alloc();
//! pool.with_bytes_mut(obj, |bytes| bytes[0] = 7).unwrap();
//! pool.free_one(obj).unwrap();
//! assert_eq!(pool.in_use_count(), 0);
//! ```
#![warn(missing_docs)]

mod chunk;
pub mod chunked;
pub mod clock;
pub mod config;
pub mod constants;
pub mod direct;
pub mod error;
pub mod meter;
pub mod pool;
pub mod registry;
pub mod stats;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChunkLayout, ChunkSizing, PoolsConfig};
pub use error::PoolError;
pub use meter::{Meter, PoolMeter, Volume};
pub use pool::{ObjectRef, Pool, PoolHandle, PoolId};
pub use registry::{CleanReport, MemPools, PoolClass};
pub use stats::{PoolStats, PoolsReport};
