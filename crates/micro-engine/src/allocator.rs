//! Arena allocators
//!
//! All working memory comes out of one caller-provided byte buffer.
//! Persistent data (tensor metadata, node table, op data, resource
//! variables) is carved from the tail and grows down; tensor storage is
//! carved from the head and grows up. The two meet in the middle, and an
//! allocation that would cross fails with [`EngineError::ArenaExhausted`].

use crate::EngineError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What an arena allocation backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationTag {
    /// Per-tensor runtime descriptors
    TensorMetadata,
    /// Per-tensor quantization parameters
    QuantizationData,
    /// Node and registration table
    NodeAndRegistration,
    /// Kernel-private persistent data
    OpData,
    /// Backing storage of non-constant tensors
    TensorData,
    /// Resource variable slots and their buffers
    ResourceVariables,
}

impl AllocationTag {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationTag::TensorMetadata => "TensorMetadata",
            AllocationTag::QuantizationData => "QuantizationData",
            AllocationTag::NodeAndRegistration => "NodeAndRegistration",
            AllocationTag::OpData => "OpData",
            AllocationTag::TensorData => "TensorData",
            AllocationTag::ResourceVariables => "ResourceVariables",
        }
    }
}

/// A byte range inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaRegion {
    pub offset: usize,
    pub len: usize,
}

impl ArenaRegion {
    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Allocator over a fixed byte region
pub trait ArenaAllocator {
    /// Allocate from the tail; lives as long as the arena
    fn allocate_persistent(
        &mut self,
        size: usize,
        align: usize,
        tag: AllocationTag,
    ) -> Result<ArenaRegion, EngineError>;

    /// Allocate from the head; used for tensor storage
    fn allocate_head(
        &mut self,
        size: usize,
        align: usize,
        tag: AllocationTag,
    ) -> Result<ArenaRegion, EngineError>;

    /// The whole arena
    fn arena(&self) -> &[u8];

    /// The whole arena, mutable
    fn arena_mut(&mut self) -> &mut [u8];

    /// Bytes in use at the head
    fn head_used(&self) -> usize;

    /// Bytes in use at the tail
    fn tail_used(&self) -> usize;

    /// Total arena size
    fn capacity(&self) -> usize {
        self.arena().len()
    }

    /// Bytes in use, alignment padding included
    fn used_bytes(&self) -> usize {
        self.head_used() + self.tail_used()
    }
}

/// Plain head/tail arena allocator
pub struct SimpleArenaAllocator<'a> {
    arena: &'a mut [u8],
    /// First free byte at the head
    head: usize,
    /// First used byte at the tail
    tail: usize,
}

impl<'a> SimpleArenaAllocator<'a> {
    /// Create an allocator over `arena`
    pub fn new(arena: &'a mut [u8]) -> Self {
        let tail = arena.len();
        Self {
            arena,
            head: 0,
            tail,
        }
    }

    fn base(&self) -> usize {
        self.arena.as_ptr() as usize
    }
}

impl ArenaAllocator for SimpleArenaAllocator<'_> {
    fn allocate_persistent(
        &mut self,
        size: usize,
        align: usize,
        tag: AllocationTag,
    ) -> Result<ArenaRegion, EngineError> {
        let base = self.base();
        let lowest = base + self.head;
        let start = (base + self.tail)
            .checked_sub(size)
            .map(|addr| align_down(addr, align))
            .filter(|&addr| addr >= lowest)
            .ok_or_else(|| {
                warn!(
                    "Failed to allocate tail memory for {}: requested {} bytes, {} available",
                    tag.as_str(),
                    size,
                    self.tail - self.head
                );
                EngineError::ArenaExhausted {
                    requested: size,
                    available: self.tail - self.head,
                }
            })?;
        self.tail = start - base;
        Ok(ArenaRegion {
            offset: self.tail,
            len: size,
        })
    }

    fn allocate_head(
        &mut self,
        size: usize,
        align: usize,
        tag: AllocationTag,
    ) -> Result<ArenaRegion, EngineError> {
        let base = self.base();
        let start = align_up(base + self.head, align) - base;
        if start + size > self.tail {
            warn!(
                "Failed to allocate head memory for {}: requested {} bytes, {} available",
                tag.as_str(),
                size,
                self.tail.saturating_sub(self.head)
            );
            return Err(EngineError::ArenaExhausted {
                requested: size,
                available: self.tail.saturating_sub(start),
            });
        }
        self.head = start + size;
        Ok(ArenaRegion {
            offset: start,
            len: size,
        })
    }

    fn arena(&self) -> &[u8] {
        self.arena
    }

    fn arena_mut(&mut self) -> &mut [u8] {
        self.arena
    }

    fn head_used(&self) -> usize {
        self.head
    }

    fn tail_used(&self) -> usize {
        self.arena.len() - self.tail
    }
}

fn align_up(addr: usize, align: usize) -> usize {
    let align = align.max(1);
    addr.div_ceil(align) * align
}

fn align_down(addr: usize, align: usize) -> usize {
    let align = align.max(1);
    addr - addr % align
}
