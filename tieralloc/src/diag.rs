//! Read-only views of allocator state
//!
//! Snapshots are plain data copied out under the relevant lock, so they can
//! be inspected or printed without holding up the allocators.

use crate::heap::HeapStats;
use crate::Tag;
use core::fmt;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBlock {
    pub addr: usize,
    pub size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveAllocation {
    pub addr: usize,
    pub tag: Tag,
    pub size: usize,
    pub padding: usize,
    pub requested: usize,
}

#[derive(Clone, Debug)]
pub struct HeapSnapshot {
    pub base: usize,
    pub capacity: usize,
    pub used: usize,
    pub available: usize,
    /// free list in ring order starting at head
    pub free_chain: Vec<FreeBlock>,
    /// live allocations ordered by address
    pub allocations: Vec<LiveAllocation>,
    pub stats: HeapStats,
}

impl HeapSnapshot {
    /// Bytes charged per tag across live allocations.
    pub fn bytes_by_tag(&self) -> BTreeMap<Tag, usize> {
        let mut tags = BTreeMap::new();
        for a in &self.allocations {
            *tags.entry(a.tag).or_insert(0) += a.size;
        }
        tags
    }

    pub fn largest_free_block(&self) -> usize {
        self.free_chain.iter().map(|b| b.size).max().unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaSnapshot {
    pub thread: u64,
    pub chunks: usize,
    pub live_objects: u64,
    /// slots freed but not yet drained back into the local list
    pub pending_foreign: usize,
}

#[derive(Clone, Debug)]
pub struct PoolSnapshot {
    pub type_name: &'static str,
    pub slot_size: usize,
    pub slots_per_chunk: usize,
    pub chunk_count: usize,
    pub live_objects: u64,
    pub used_bytes: usize,
    pub available_bytes: usize,
    /// cumulative allocations per tag
    pub tags: BTreeMap<Tag, u64>,
    pub arenas: Vec<ArenaSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearSnapshot {
    pub thread: u64,
    pub total: usize,
    pub allocated: usize,
    pub remaining: usize,
    /// bytes bumped per tag since the last reset
    pub tags: BTreeMap<Tag, usize>,
}

/// Everything a [`MemorySystem`](crate::MemorySystem) can see from the
/// calling thread.
#[derive(Clone, Debug)]
pub struct MemoryReport {
    pub heap: HeapSnapshot,
    pub pools: Vec<PoolSnapshot>,
    pub linear: Option<LinearSnapshot>,
    pub linear_regions: usize,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = &self.heap;
        writeln!(
            f,
            "heap @ {:#x}: {} / {} bytes used (peak {}), {} live, {} free blocks, largest {}",
            heap.base,
            heap.used,
            heap.capacity,
            heap.stats.peak_used,
            heap.stats.live_allocations,
            heap.free_chain.len(),
            heap.largest_free_block(),
        )?;
        for (tag, bytes) in heap.bytes_by_tag() {
            writeln!(f, "  {:<24} {:>12} bytes", tag, bytes)?;
        }

        for pool in &self.pools {
            writeln!(
                f,
                "pool<{}>: slot {} x {}/chunk, {} chunks, {} live, {} used / {} available bytes",
                pool.type_name,
                pool.slot_size,
                pool.slots_per_chunk,
                pool.chunk_count,
                pool.live_objects,
                pool.used_bytes,
                pool.available_bytes,
            )?;
            for (tag, n) in &pool.tags {
                writeln!(f, "  {:<24} {:>12} allocations", tag, n)?;
            }
        }

        write!(f, "linear: {} regions", self.linear_regions)?;
        if let Some(linear) = &self.linear {
            write!(
                f,
                ", this thread {} / {} bytes ({} remaining)",
                linear.allocated, linear.total, linear.remaining
            )?;
            for (tag, bytes) in &linear.tags {
                write!(f, "\n  {:<24} {:>12} bytes", tag, bytes)?;
            }
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_snapshot() -> HeapSnapshot {
        HeapSnapshot {
            base: 0x1000,
            capacity: 1024,
            used: 248,
            available: 776,
            free_chain: vec![FreeBlock { addr: 0x1000 + 248, size: 776 }],
            allocations: vec![
                LiveAllocation { addr: 0x1000, tag: "mesh", size: 40, padding: 0, requested: 40 },
                LiveAllocation { addr: 0x1030, tag: "mesh", size: 208, padding: 8, requested: 200 },
            ],
            stats: HeapStats::default(),
        }
    }

    #[test]
    fn tag_totals() {
        let snap = heap_snapshot();
        assert_eq!(snap.bytes_by_tag()["mesh"], 248);
        assert_eq!(snap.largest_free_block(), 776);
    }

    #[test]
    fn report_renders_every_tier() {
        let report = MemoryReport {
            heap: heap_snapshot(),
            pools: vec![PoolSnapshot {
                type_name: "Bullet",
                slot_size: 64,
                slots_per_chunk: 63,
                chunk_count: 2,
                live_objects: 100,
                used_bytes: 6400,
                available_bytes: 1664,
                tags: [("bullet", 100)].into_iter().collect(),
                arenas: Vec::new(),
            }],
            linear: Some(LinearSnapshot {
                thread: 1,
                total: 4096,
                allocated: 96,
                remaining: 4000,
                tags: [("frame", 96)].into_iter().collect(),
            }),
            linear_regions: 1,
        };
        let text = report.to_string();
        assert!(text.contains("248 / 1024 bytes used"));
        assert!(text.contains("mesh"));
        assert!(text.contains("pool<Bullet>"));
        assert!(text.contains("100 allocations"));
        assert!(text.contains("this thread 96 / 4096 bytes"));
        assert!(text.contains("frame"));
    }
}
