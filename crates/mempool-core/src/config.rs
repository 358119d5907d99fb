//! Registry and chunk-sizing configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHUNK_BYTES, DEFAULT_IDLE_LIMIT, DEFAULT_MIN_FREE_CHUNKS, MAX_CHUNK_BYTES,
    MAX_CHUNK_OBJECTS, MEM_PAGE_SIZE, MIN_CHUNK_OBJECTS,
};
use crate::error::PoolError;

/// Geometry of one chunk for a given object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Objects per chunk, `1..=65535`.
    pub capacity: u16,
    /// Bytes backing one chunk (`capacity * object_size`).
    pub bytes: usize,
}

/// Tunable chunk-sizing policy.
///
/// The target size is rounded up to whole pages, then the object count is
/// bounded below by `min_objects`, above by `max_bytes` and the `u16` slot
/// range. The count is then grown to fill the last page it touches. A chunk
/// holds exactly that many objects, so its footprint is the object count
/// times the object size and need not be a page multiple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSizing {
    /// Page size chunks are rounded to.
    pub page_size: usize,
    /// Preferred chunk footprint in bytes.
    pub target_bytes: usize,
    /// Minimum objects per chunk.
    pub min_objects: usize,
    /// Maximum chunk footprint in bytes (may be exceeded by less than a page
    /// when the count is grown to fill its last page).
    pub max_bytes: usize,
}

impl Default for ChunkSizing {
    fn default() -> Self {
        Self {
            page_size: MEM_PAGE_SIZE,
            target_bytes: DEFAULT_CHUNK_BYTES,
            min_objects: MIN_CHUNK_OBJECTS,
            max_bytes: MAX_CHUNK_BYTES,
        }
    }
}

impl ChunkSizing {
    /// Compute the chunk layout for objects of `object_size` bytes.
    ///
    /// `object_size` must be non-zero; the registry rejects zero sizes first.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn layout(&self, object_size: usize) -> ChunkLayout {
        debug_assert!(object_size > 0);
        let round =
            |bytes: usize| bytes.div_ceil(self.page_size).saturating_mul(self.page_size);

        let mut capacity = round(self.target_bytes) / object_size;
        capacity = capacity.max(self.min_objects);
        if capacity.saturating_mul(object_size) > self.max_bytes {
            capacity = self.max_bytes / object_size;
        }
        capacity = capacity.clamp(1, MAX_CHUNK_OBJECTS);

        capacity =
            (round(capacity.saturating_mul(object_size)) / object_size).clamp(1, MAX_CHUNK_OBJECTS);

        ChunkLayout {
            capacity: capacity as u16,
            bytes: capacity * object_size,
        }
    }

    /// Reject values that cannot produce a sensible layout.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.page_size == 0 {
            return Err(PoolError::InvalidConfig("page_size must be non-zero".into()));
        }
        if self.target_bytes == 0 {
            return Err(PoolError::InvalidConfig(
                "target_bytes must be non-zero".into(),
            ));
        }
        if self.min_objects == 0 || self.min_objects > MAX_CHUNK_OBJECTS {
            return Err(PoolError::InvalidConfig(format!(
                "min_objects must be in 1..={MAX_CHUNK_OBJECTS}, got {}",
                self.min_objects
            )));
        }
        if self.max_bytes < self.page_size {
            return Err(PoolError::InvalidConfig(format!(
                "max_bytes ({}) must be at least one page ({})",
                self.max_bytes, self.page_size
            )));
        }
        Ok(())
    }
}

/// Configuration of a `MemPools` registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    /// Soft budget for retained-but-unused bytes across all pools.
    pub idle_limit: usize,
    /// Whether new pools use the chunked strategy.
    pub default_chunked: bool,
    /// Chunk sizing policy for chunked pools.
    pub chunk_sizing: ChunkSizing,
    /// Wholly free chunks each pool keeps through `clean` unless it is over
    /// its idle share.
    pub min_free_chunks: usize,
    /// Maximum entries in a pool's free-list cache. `None` means one chunk.
    pub free_cache_limit: Option<usize>,
    /// Zero object bytes when they are freed.
    pub zero_on_release: bool,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            idle_limit: DEFAULT_IDLE_LIMIT,
            default_chunked: true,
            chunk_sizing: ChunkSizing::default(),
            min_free_chunks: DEFAULT_MIN_FREE_CHUNKS,
            free_cache_limit: None,
            zero_on_release: true,
        }
    }
}

impl PoolsConfig {
    /// Validate every field.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.chunk_sizing.validate()
    }
}
