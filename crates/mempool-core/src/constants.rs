//! Constants for pool sizing and idle-memory defaults.

/// System page size assumed when sizing chunks.
pub const MEM_PAGE_SIZE: usize = 4096;

/// Default target footprint of one chunk (four pages).
pub const DEFAULT_CHUNK_BYTES: usize = 4 * MEM_PAGE_SIZE;

/// Upper bound on the footprint of one chunk.
pub const MAX_CHUNK_BYTES: usize = 256 * 1024;

/// Minimum number of objects a chunk is sized for, unless the object is too
/// large to fit `MAX_CHUNK_BYTES`.
pub const MIN_CHUNK_OBJECTS: usize = 32;

/// Slot indices are `u16`, so a chunk never holds more than this many objects.
pub const MAX_CHUNK_OBJECTS: usize = u16::MAX as usize;

/// Idle-memory budget applied until the host reconfigures it (2 MiB).
pub const DEFAULT_IDLE_LIMIT: usize = 2 << 20;

/// Number of wholly free chunks a pool keeps through `clean` by default.
pub const DEFAULT_MIN_FREE_CHUNKS: usize = 0;

/// Shift applied to each pool's idle share during a normal sweep.
pub const SWEEP_SHIFT: u32 = 1;
