//! Shared first-fit heap over one fixed backing region
//!
//! All state sits behind a single [`SpinMutex`]; every allocate and free is
//! O(free blocks) while holding it.

mod record;
pub(crate) mod ring;

pub use record::{AllocationRecord, HeapStats};

use crate::config::HEAP_SIZE;
use crate::diag::{FreeBlock, HeapSnapshot, LiveAllocation};
use crate::error::{AllocError, Result};
use crate::mm::{check_align, ByteBuffer};
use crate::pal::{MappedRegion, PageHeap};
use crate::sync::SpinMutex;
use crate::Tag;
use core::ptr::NonNull;
use ring::{FreeRing, ENTRY_SIZE};
use std::collections::BTreeMap;

#[cfg(feature = "poison_on_free")]
const POISON: u8 = 0xdd;

struct HeapState {
    ring: FreeRing,
    records: BTreeMap<usize, AllocationRecord>,
    stats: HeapStats,
}

/// First-fit allocator with an intrusive circular free list.
///
/// # Notes
///
/// The free list is threaded through the free memory itself: each free
/// block starts with a `{size, next}` header. Live allocations are tracked
/// in a side table, so freeing needs only the address.
///
/// Requests smaller than a free-list header are rounded up to one header so
/// that every allocation can become a free block again.
pub struct HeapAllocator {
    state: SpinMutex<HeapState>,
    buf: ByteBuffer,
    capacity: usize,
    // keeps the mapping alive; must outlive `state`
    _region: MappedRegion,
}

impl HeapAllocator {
    /// Heap over `HEAP_SIZE` bytes, the build-time default.
    pub fn new() -> Result<Self> {
        Self::with_capacity(HEAP_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AllocError::ZeroSize);
        }
        let capacity = capacity.max(ENTRY_SIZE);
        let region = PageHeap::default().map(capacity)?;
        let buf = unsafe { ByteBuffer::from_raw(region.base().as_ptr(), capacity) };
        let ring = unsafe { FreeRing::new(buf) };
        tracing::debug!(base = buf.start(), capacity, "heap allocator ready");
        Ok(Self {
            state: SpinMutex::new(HeapState {
                ring,
                records: BTreeMap::new(),
                stats: HeapStats::default(),
            }),
            buf,
            capacity,
            _region: region,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address of the first byte of the backing region.
    pub fn base(&self) -> usize {
        self.buf.start()
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        self.buf.contains(ptr as usize)
    }

    pub fn allocate(&self, size: usize, align: usize, tag: Tag) -> Result<NonNull<u8>> {
        check_align(align)?;
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let mut state = self.state.lock();
        let carved = match state.ring.carve(size, align) {
            Some(c) => c,
            None => {
                state.stats.failed_allocations += 1;
                let largest = state.ring.largest_block();
                let free = state.ring.free_bytes();
                drop(state);
                tracing::warn!(size, align, tag, largest, free, "heap out of memory");
                return Err(AllocError::OutOfMemory { size, align });
            }
        };

        let record = AllocationRecord {
            tag,
            size: carved.charged,
            padding: carved.padding,
            requested: size,
        };
        let previous = state.records.insert(carved.addr, record);
        debug_assert!(previous.is_none(), "address {:#x} handed out twice", carved.addr);
        state.stats.on_allocate(carved.charged);
        drop(state);

        tracing::trace!(
            addr = carved.addr,
            size,
            align,
            charged = carved.charged,
            padding = carved.padding,
            tag,
            "heap allocate"
        );
        // carved addresses come from inside the mapped region
        NonNull::new(carved.addr as *mut u8)
            .ok_or_else(|| AllocError::Corrupted("free list produced a null address".into()))
    }

    pub fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        let addr = ptr.as_ptr() as usize;
        let mut state = self.state.lock();
        let record = match state.records.remove(&addr) {
            Some(r) => r,
            None => {
                drop(state);
                tracing::error!(addr, "free of an address with no live allocation");
                return Err(AllocError::UnknownAddress(addr));
            }
        };

        let start = record.block_start(addr);
        #[cfg(feature = "poison_on_free")]
        unsafe {
            self.buf.fill(start, record.size, POISON);
        }
        state.ring.release(start, record.size);
        state.stats.on_free(record.size);
        drop(state);

        tracing::trace!(addr, size = record.size, tag = record.tag, "heap free");
        Ok(())
    }

    /// Record for a live allocation, if `ptr` is one.
    pub fn record(&self, ptr: *const u8) -> Option<AllocationRecord> {
        self.state.lock().records.get(&(ptr as usize)).copied()
    }

    pub fn used(&self) -> usize {
        self.state.lock().stats.used
    }

    pub fn available(&self) -> usize {
        self.state.lock().ring.free_bytes()
    }

    pub fn stats(&self) -> HeapStats {
        self.state.lock().stats
    }

    pub fn free_block_count(&self) -> usize {
        self.state.lock().ring.blocks()
    }

    pub fn largest_free_block(&self) -> usize {
        self.state.lock().ring.largest_block()
    }

    pub fn snapshot(&self) -> HeapSnapshot {
        let state = self.state.lock();
        HeapSnapshot {
            base: self.buf.start(),
            capacity: self.capacity,
            used: state.stats.used,
            available: state.ring.free_bytes(),
            free_chain: state
                .ring
                .iter()
                .map(|(addr, size)| FreeBlock { addr, size })
                .collect(),
            allocations: state
                .records
                .iter()
                .map(|(&addr, r)| LiveAllocation {
                    addr,
                    tag: r.tag,
                    size: r.size,
                    padding: r.padding,
                    requested: r.requested,
                })
                .collect(),
            stats: state.stats,
        }
    }

    /// Verifies the free ring, the record table and that together they
    /// partition the backing region exactly.
    pub fn check_invariants(&self) -> Result<()> {
        let state = self.state.lock();
        let fail = |msg: String| {
            tracing::error!(%msg, "heap invariant violated");
            Err(AllocError::Corrupted(msg))
        };

        if let Err(msg) = state.ring.check() {
            return fail(msg);
        }

        let mut ranges: Vec<(usize, usize, bool)> = state
            .ring
            .iter()
            .map(|(addr, size)| (addr, addr + size, true))
            .collect();
        let mut used = 0;
        for (&addr, r) in &state.records {
            let start = r.block_start(addr);
            if !self.buf.contains_range(start, r.size) {
                return fail(format!("allocation {:#x} escapes the heap", addr));
            }
            if r.requested > r.size - r.padding {
                return fail(format!("allocation {:#x} is smaller than requested", addr));
            }
            used += r.size;
            ranges.push((start, r.block_end(addr), false));
        }
        if used != state.stats.used {
            return fail(format!("records hold {} bytes, counter says {}", used, state.stats.used));
        }

        ranges.sort_unstable();
        let mut cursor = self.buf.start();
        for (start, end, is_free) in ranges {
            if start != cursor {
                return fail(format!(
                    "{} range at {:#x} does not follow {:#x}",
                    if is_free { "free" } else { "live" },
                    start,
                    cursor
                ));
            }
            cursor = end;
        }
        if cursor != self.buf.end() {
            return fail(format!("{} trailing bytes unaccounted", self.buf.end() - cursor));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(p: NonNull<u8>) -> usize {
        p.as_ptr() as usize
    }

    #[test]
    fn allocate_respects_alignment() {
        let heap = HeapAllocator::with_capacity(64 * 1024).unwrap();
        for &align in &[1usize, 2, 8, 16, 64, 256, 4096] {
            let p = heap.allocate(24, align, "align").unwrap();
            assert_eq!(addr(p) % align, 0, "align {}", align);
            heap.check_invariants().unwrap();
        }
    }

    #[test]
    fn rejects_bad_requests() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        assert_eq!(
            heap.allocate(8, 0, "bad").err(),
            Some(AllocError::InvalidAlignment(0))
        );
        assert_eq!(
            heap.allocate(8, 12, "bad").err(),
            Some(AllocError::InvalidAlignment(12))
        );
        assert_eq!(heap.allocate(0, 8, "bad").err(), Some(AllocError::ZeroSize));
        assert_eq!(heap.stats().total_allocations, 0);
    }

    #[test]
    fn out_of_memory_is_an_error() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        let err = heap.allocate(2048, 8, "big").unwrap_err();
        assert_eq!(err, AllocError::OutOfMemory { size: 2048, align: 8 });
        assert_eq!(heap.stats().failed_allocations, 1);
        // the heap is still usable
        let p = heap.allocate(512, 8, "fits").unwrap();
        heap.free(p).unwrap();
        assert_eq!(heap.available(), 1024);
    }

    #[test]
    fn double_free_is_reported() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        let p = heap.allocate(32, 8, "once").unwrap();
        heap.free(p).unwrap();
        assert_eq!(heap.free(p), Err(AllocError::UnknownAddress(addr(p))));
        heap.check_invariants().unwrap();
    }

    #[test]
    fn foreign_pointer_is_reported() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        let mut local = 0u64;
        let p = NonNull::from(&mut local).cast::<u8>();
        assert!(!heap.contains(p.as_ptr()));
        assert!(matches!(heap.free(p), Err(AllocError::UnknownAddress(_))));
    }

    #[test]
    fn records_carry_tag_and_padding() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        let a = heap.allocate(40, 16, "mesh").unwrap();
        let b = heap.allocate(200, 16, "texture").unwrap();
        let ra = heap.record(a.as_ptr()).unwrap();
        let rb = heap.record(b.as_ptr()).unwrap();
        assert_eq!(ra.tag, "mesh");
        assert_eq!(ra.padding, 0);
        assert_eq!(ra.size, 40);
        assert_eq!(rb.tag, "texture");
        assert_eq!(rb.padding, 8);
        assert_eq!(rb.size, 208);
        assert_eq!(rb.requested, 200);
        assert_eq!(heap.used(), 248);
    }

    #[test]
    fn tiny_requests_still_free_cleanly() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        let ptrs: Vec<_> = (0..10).map(|_| heap.allocate(1, 1, "byte").unwrap()).collect();
        for p in ptrs.iter().step_by(2) {
            heap.free(*p).unwrap();
            heap.check_invariants().unwrap();
        }
        for p in ptrs.iter().skip(1).step_by(2) {
            heap.free(*p).unwrap();
        }
        heap.check_invariants().unwrap();
        assert_eq!(heap.free_block_count(), 1);
        assert_eq!(heap.available(), 1024);
    }

    #[test]
    fn snapshot_lists_chain_and_allocations() {
        let heap = HeapAllocator::with_capacity(4096).unwrap();
        let a = heap.allocate(100, 8, "a").unwrap();
        let _b = heap.allocate(100, 8, "b").unwrap();
        heap.free(a).unwrap();
        let snap = heap.snapshot();
        assert_eq!(snap.capacity, 4096);
        assert_eq!(snap.allocations.len(), 1);
        assert_eq!(snap.allocations[0].tag, "b");
        assert_eq!(snap.free_chain.len(), 2);
        assert_eq!(snap.free_chain[0].addr, heap.base());
        assert_eq!(
            snap.used + snap.free_chain.iter().map(|b| b.size).sum::<usize>(),
            4096
        );
    }

    #[cfg(feature = "poison_on_free")]
    #[test]
    fn freed_payload_is_poisoned() {
        let heap = HeapAllocator::with_capacity(1024).unwrap();
        let a = heap.allocate(64, 8, "victim").unwrap();
        let _guard = heap.allocate(64, 8, "neighbour").unwrap();
        unsafe { a.as_ptr().write_bytes(0x11, 64) };
        heap.free(a).unwrap();
        // the first ENTRY_SIZE bytes now hold the free-list header
        for off in ENTRY_SIZE..64 {
            assert_eq!(unsafe { a.as_ptr().add(off).read() }, POISON);
        }
        heap.check_invariants().unwrap();
    }
}
