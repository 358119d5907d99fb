//! Direct (non-chunked) pool strategy: one system allocation per object.

use std::time::Duration;

use crate::pool::{CleanOutcome, Freed, ObjectRef, PoolId, PoolStrategy, SlotFault};

/// Generation moves on when a vacant block is reused.
struct Block {
    generation: u32,
    data: Option<Box<[u8]>>,
}

/// Pass-through strategy that still reports through the pool contract.
pub struct DirectPool {
    pool: PoolId,
    object_size: usize,
    blocks: Vec<Block>,
    vacant: Vec<u32>,
    in_use: usize,
}

impl DirectPool {
    /// Create an empty direct pool.
    #[must_use]
    pub fn new(pool: PoolId, object_size: usize) -> Self {
        Self {
            pool,
            object_size,
            blocks: Vec::new(),
            vacant: Vec::new(),
            in_use: 0,
        }
    }

    fn live(&self, obj: ObjectRef) -> Result<usize, SlotFault> {
        let index = obj.block as usize;
        let block = self.blocks.get(index).ok_or(SlotFault::OutOfRange)?;
        if obj.slot != 0 {
            return Err(SlotFault::OutOfRange);
        }
        if block.generation != obj.generation {
            return Err(SlotFault::Stale);
        }
        if block.data.is_none() {
            return Err(SlotFault::NotCheckedOut);
        }
        Ok(index)
    }
}

impl PoolStrategy for DirectPool {
    fn allocate(&mut self) -> ObjectRef {
        let data = Some(vec![0u8; self.object_size].into_boxed_slice());
        let block = if let Some(block) = self.vacant.pop() {
            let entry = &mut self.blocks[block as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.data = data;
            block
        } else {
            self.blocks.push(Block {
                generation: 0,
                data,
            });
            u32::try_from(self.blocks.len() - 1).unwrap_or(u32::MAX)
        };
        self.in_use += 1;
        ObjectRef::new(self.pool, block, self.blocks[block as usize].generation, 0)
    }

    fn deallocate(&mut self, obj: ObjectRef, _aggressive: bool) -> Result<Freed, SlotFault> {
        let index = self.live(obj)?;
        self.blocks[index].data = None;
        self.vacant.push(obj.block);
        self.in_use -= 1;
        Ok(Freed::Returned)
    }

    fn bytes(&self, obj: ObjectRef) -> Result<&[u8], SlotFault> {
        let index = self.live(obj)?;
        self.blocks[index]
            .data
            .as_deref()
            .ok_or(SlotFault::NotCheckedOut)
    }

    fn bytes_mut(&mut self, obj: ObjectRef) -> Result<&mut [u8], SlotFault> {
        let index = self.live(obj)?;
        self.blocks[index]
            .data
            .as_deref_mut()
            .ok_or(SlotFault::NotCheckedOut)
    }

    fn in_use_count(&self) -> usize {
        self.in_use
    }

    fn allocated_bytes(&self) -> usize {
        self.in_use * self.object_size
    }

    fn idle_bytes(&self) -> usize {
        0
    }

    fn clean(&mut self, _max_age: Duration, _keep_free: usize) -> CleanOutcome {
        CleanOutcome::default()
    }

    fn is_chunked(&self) -> bool {
        false
    }
}
