//! Recording allocator
//!
//! Wraps [`SimpleArenaAllocator`] and keeps a record of every successful
//! allocation (tag, requested size, size with alignment overhead,
//! alignment) so memory use can be reported after binding.

use crate::allocator::{AllocationTag, ArenaAllocator, ArenaRegion, SimpleArenaAllocator};
use crate::EngineError;
use serde::Serialize;
use tracing::info;

/// One recorded allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    pub tag: AllocationTag,
    /// Bytes asked for
    pub requested_bytes: usize,
    /// Bytes consumed, alignment padding included
    pub used_bytes: usize,
    pub alignment: usize,
    /// Tail (persistent) or head allocation
    pub persistent: bool,
}

/// Aggregate use for one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagUsage {
    pub tag: AllocationTag,
    pub requested_bytes: usize,
    pub used_bytes: usize,
    pub count: usize,
}

/// Memory report produced by a [`RecordingAllocator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationReport {
    pub arena_bytes: usize,
    pub head_bytes: usize,
    pub tail_bytes: usize,
    pub records: Vec<AllocationRecord>,
    pub by_tag: Vec<TagUsage>,
}

impl AllocationReport {
    /// Total bytes in use
    pub fn total_bytes(&self) -> usize {
        self.head_bytes + self.tail_bytes
    }

    /// Usage for a single tag
    pub fn usage(&self, tag: AllocationTag) -> Option<&TagUsage> {
        self.by_tag.iter().find(|u| u.tag == tag)
    }

    /// Log the arena summary, every recorded allocation, then per-tag totals
    pub fn log(&self) {
        info!("[RecordingAllocator] Arena allocation total {} bytes", self.total_bytes());
        info!("[RecordingAllocator] Arena allocation head {} bytes", self.head_bytes);
        info!("[RecordingAllocator] Arena allocation tail {} bytes", self.tail_bytes);
        for (i, r) in self.records.iter().enumerate() {
            info!(
                "[RecordingAllocator] #{} '{}' requested {} bytes, used {} bytes (alignment {}, {})",
                i,
                r.tag.as_str(),
                r.requested_bytes,
                r.used_bytes,
                r.alignment,
                if r.persistent { "tail" } else { "head" }
            );
        }
        for u in &self.by_tag {
            info!(
                "[RecordingAllocator] '{}' used {} bytes with alignment overhead (requested {} bytes) for {} allocations",
                u.tag.as_str(),
                u.used_bytes,
                u.requested_bytes,
                u.count
            );
        }
    }
}

/// Allocator that records every allocation it serves
pub struct RecordingAllocator<'a> {
    inner: SimpleArenaAllocator<'a>,
    records: Vec<AllocationRecord>,
}

impl<'a> RecordingAllocator<'a> {
    /// Create a recording allocator over `arena`
    pub fn new(arena: &'a mut [u8]) -> Self {
        Self {
            inner: SimpleArenaAllocator::new(arena),
            records: Vec::new(),
        }
    }

    /// Recorded allocations in request order
    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    /// Build a report of everything recorded so far
    pub fn report(&self) -> AllocationReport {
        let mut by_tag: Vec<TagUsage> = Vec::new();
        for r in &self.records {
            match by_tag.iter_mut().find(|u| u.tag == r.tag) {
                Some(u) => {
                    u.requested_bytes += r.requested_bytes;
                    u.used_bytes += r.used_bytes;
                    u.count += 1;
                }
                None => by_tag.push(TagUsage {
                    tag: r.tag,
                    requested_bytes: r.requested_bytes,
                    used_bytes: r.used_bytes,
                    count: 1,
                }),
            }
        }

        AllocationReport {
            arena_bytes: self.inner.capacity(),
            head_bytes: self.inner.head_used(),
            tail_bytes: self.inner.tail_used(),
            records: self.records.clone(),
            by_tag,
        }
    }

    /// Log the allocation report
    pub fn print_allocations(&self) {
        self.report().log();
    }
}

impl ArenaAllocator for RecordingAllocator<'_> {
    fn allocate_persistent(
        &mut self,
        size: usize,
        align: usize,
        tag: AllocationTag,
    ) -> Result<ArenaRegion, EngineError> {
        let before = self.inner.tail_used();
        let region = self.inner.allocate_persistent(size, align, tag)?;
        self.records.push(AllocationRecord {
            tag,
            requested_bytes: size,
            used_bytes: self.inner.tail_used() - before,
            alignment: align,
            persistent: true,
        });
        Ok(region)
    }

    fn allocate_head(
        &mut self,
        size: usize,
        align: usize,
        tag: AllocationTag,
    ) -> Result<ArenaRegion, EngineError> {
        let before = self.inner.head_used();
        let region = self.inner.allocate_head(size, align, tag)?;
        self.records.push(AllocationRecord {
            tag,
            requested_bytes: size,
            used_bytes: self.inner.head_used() - before,
            alignment: align,
            persistent: false,
        });
        Ok(region)
    }

    fn arena(&self) -> &[u8] {
        self.inner.arena()
    }

    fn arena_mut(&mut self) -> &mut [u8] {
        self.inner.arena_mut()
    }

    fn head_used(&self) -> usize {
        self.inner.head_used()
    }

    fn tail_used(&self) -> usize {
        self.inner.tail_used()
    }
}
