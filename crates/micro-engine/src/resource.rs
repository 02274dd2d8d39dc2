//! Resource variables
//!
//! Named, mutable buffers that persist across invocations. The slot table
//! and every variable buffer are carved from the persistent end of the
//! arena, so they survive as long as the arena does.

use crate::EngineError;
use crate::allocator::{AllocationTag, ArenaAllocator, ArenaRegion};
use tracing::{debug, warn};

/// Arena bytes reserved per slot: two name handles and a buffer region
pub const SLOT_BYTES: usize = 16;

const BUFFER_ALIGN: usize = 16;

#[derive(Debug, Clone)]
struct Slot {
    container: String,
    shared_name: String,
    buffer: Option<ArenaRegion>,
}

/// Fixed-capacity table of resource variables
#[derive(Debug)]
pub struct ResourceVariables {
    slots: Vec<Slot>,
    capacity: usize,
    table: ArenaRegion,
}

impl ResourceVariables {
    /// Reserve a table of `capacity` slots in the arena
    pub fn create<A: ArenaAllocator + ?Sized>(
        allocator: &mut A,
        capacity: usize,
    ) -> Result<Self, EngineError> {
        let table = allocator.allocate_persistent(
            capacity * SLOT_BYTES,
            8,
            AllocationTag::ResourceVariables,
        )?;
        debug!("Reserved {} resource variable slots", capacity);
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            table,
        })
    }

    /// Id for (`container`, `shared_name`), creating the slot on first use
    pub fn create_id(&mut self, container: &str, shared_name: &str) -> Result<usize, EngineError> {
        if let Some(id) = self
            .slots
            .iter()
            .position(|s| s.container == container && s.shared_name == shared_name)
        {
            return Ok(id);
        }
        if self.slots.len() >= self.capacity {
            warn!(
                "Resource variable table full ({} slots), cannot add {}/{}",
                self.capacity, container, shared_name
            );
            return Err(EngineError::ResourceVariable(format!(
                "no free slot for {}/{}",
                container, shared_name
            )));
        }
        self.slots.push(Slot {
            container: container.to_string(),
            shared_name: shared_name.to_string(),
            buffer: None,
        });
        Ok(self.slots.len() - 1)
    }

    /// Give variable `id` a zeroed buffer of `bytes`
    ///
    /// A second call with the same size is a no-op; a different size fails.
    pub fn allocate<A: ArenaAllocator + ?Sized>(
        &mut self,
        allocator: &mut A,
        id: usize,
        bytes: usize,
    ) -> Result<ArenaRegion, EngineError> {
        let slot = self.slot_mut(id)?;
        if let Some(region) = slot.buffer {
            if region.len == bytes {
                return Ok(region);
            }
            return Err(EngineError::ResourceVariable(format!(
                "variable {} already holds {} bytes, cannot resize to {}",
                id, region.len, bytes
            )));
        }
        let region =
            allocator.allocate_persistent(bytes, BUFFER_ALIGN, AllocationTag::ResourceVariables)?;
        allocator.arena_mut()[region.offset..region.end()].fill(0);
        slot.buffer = Some(region);
        Ok(region)
    }

    /// Copy `data` into variable `id`, allocating on first assignment
    pub fn assign<A: ArenaAllocator + ?Sized>(
        &mut self,
        allocator: &mut A,
        id: usize,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let region = self.allocate(allocator, id, data.len())?;
        allocator.arena_mut()[region.offset..region.end()].copy_from_slice(data);
        Ok(())
    }

    /// Current contents of variable `id`
    pub fn read<'x>(&self, arena: &'x [u8], id: usize) -> Result<&'x [u8], EngineError> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| EngineError::ResourceVariable(format!("unknown variable {}", id)))?;
        let region = slot.buffer.ok_or_else(|| {
            EngineError::ResourceVariable(format!("variable {} has not been assigned", id))
        })?;
        arena
            .get(region.offset..region.end())
            .ok_or_else(|| EngineError::ResourceVariable(format!("variable {} out of arena", id)))
    }

    /// Zero every allocated buffer
    pub fn reset_all(&self, arena: &mut [u8]) {
        for region in self.slots.iter().filter_map(|s| s.buffer) {
            if let Some(bytes) = arena.get_mut(region.offset..region.end()) {
                bytes.fill(0);
            }
        }
    }

    /// Number of ids handed out
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arena region holding the slot table
    pub fn table(&self) -> ArenaRegion {
        self.table
    }

    fn slot_mut(&mut self, id: usize) -> Result<&mut Slot, EngineError> {
        self.slots
            .get_mut(id)
            .ok_or_else(|| EngineError::ResourceVariable(format!("unknown variable {}", id)))
    }
}
