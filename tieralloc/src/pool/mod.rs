//! Per-type, per-thread pool allocator
//!
//! Every thread gets its own [`Arena`] of fixed-size slots carved from
//! chunks of the shared heap. Allocation and same-thread reuse never take a
//! shared lock; a free from another thread goes through the owning arena's
//! foreign list, found through the header at the start of the slot's chunk.

mod arena;
mod chunk;

pub use chunk::ChunkLayout;

use crate::config::CHUNK_SIZE;
use crate::diag::{ArenaSnapshot, PoolSnapshot};
use crate::error::{AllocError, Result};
use crate::heap::HeapAllocator;
use crate::Tag;
use arena::Arena;
use chunk::Chunk;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;
use thread_local::ThreadLocal;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Pool of `T`-sized slots backed by `CHUNK`-byte chunks of a
/// [`HeapAllocator`].
///
/// Slots of a chunk always go back to the arena that carved the chunk, even
/// when freed from another thread. Chunks stay with their arena until the
/// pool is dropped, at which point all of them return to the heap.
pub struct PoolAllocator<T, const CHUNK: usize = CHUNK_SIZE> {
    heap: Arc<HeapAllocator>,
    arenas: ThreadLocal<Arena>,
    id: u64,
    _marker: PhantomData<T>,
}

impl<T, const CHUNK: usize> PoolAllocator<T, CHUNK> {
    pub const LAYOUT: ChunkLayout =
        ChunkLayout::new(core::mem::size_of::<T>(), core::mem::align_of::<T>(), CHUNK);

    pub fn new(heap: Arc<HeapAllocator>) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let layout = Self::LAYOUT;
        tracing::debug!(
            pool = id,
            ty = core::any::type_name::<T>(),
            slot_size = layout.slot_size,
            slots_per_chunk = layout.slots,
            chunk_size = CHUNK,
            "pool allocator created"
        );
        Self {
            heap,
            arenas: ThreadLocal::new(),
            id,
            _marker: PhantomData,
        }
    }

    /// Uninitialized slot for one `T`, owned by the calling thread's arena.
    pub fn allocate_block(&self, tag: Tag) -> Result<NonNull<T>> {
        let arena = self.arenas.get_or(Arena::new);
        // the arena handed out by `get_or` belongs to this thread
        let slot = unsafe { arena.pop(&self.heap, &Self::LAYOUT, self.id, tag)? };
        Ok(slot.cast())
    }

    /// Moves `value` into a fresh slot.
    pub fn allocate(&self, value: T, tag: Tag) -> Result<NonNull<T>> {
        let ptr = self.allocate_block(tag)?;
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Drops the object at `ptr` and returns its slot to the owning arena.
    ///
    /// Pointers outside the heap, off a slot boundary, or inside a chunk
    /// stamped with another pool's id are rejected with
    /// [`AllocError::UnknownAddress`] before anything is dropped. The check
    /// reads the header at the chunk-aligned base, so a non-pool heap block
    /// that happens to hold this pool's id there is not caught.
    ///
    /// # Safety
    ///
    /// `ptr` must hold an initialized `T` obtained from this pool and must
    /// not be freed twice.
    pub unsafe fn free(&self, ptr: NonNull<T>) -> Result<()> {
        let addr = ptr.as_ptr() as usize;
        let arena = self.owning_arena(addr).ok_or_else(|| {
            tracing::error!(pool = self.id, addr, "free of a pointer this pool does not own");
            AllocError::UnknownAddress(addr)
        })?;
        core::ptr::drop_in_place(ptr.as_ptr());
        arena.push_foreign(ptr.cast());
        Ok(())
    }

    fn owning_arena(&self, addr: usize) -> Option<&Arena> {
        let layout = &Self::LAYOUT;
        let base = layout.chunk_base(addr);
        if !self.heap.contains(base as *const u8) || !layout.is_slot_start(addr) {
            return None;
        }
        let chunk = unsafe { Chunk::at(base, layout) };
        if chunk.pool_id() != self.id {
            return None;
        }
        // arenas live in `self.arenas` and never move until the pool drops
        Some(unsafe { &*(chunk.arena_addr() as *const Arena) })
    }

    pub fn slot_size(&self) -> usize {
        Self::LAYOUT.slot_size
    }

    pub fn slots_per_chunk(&self) -> usize {
        Self::LAYOUT.slots
    }

    pub fn chunk_count(&self) -> usize {
        self.arenas.iter().map(Arena::chunk_count).sum()
    }

    pub fn live_objects(&self) -> u64 {
        self.arenas.iter().map(Arena::live_objects).sum()
    }

    pub fn arena_count(&self) -> usize {
        self.arenas.iter().count()
    }

    pub fn heap(&self) -> &Arc<HeapAllocator> {
        &self.heap
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let layout = Self::LAYOUT;
        let mut tags = BTreeMap::new();
        let mut arenas = Vec::new();
        for arena in self.arenas.iter() {
            for (tag, n) in arena.tags() {
                *tags.entry(tag).or_insert(0) += n;
            }
            arenas.push(ArenaSnapshot {
                thread: arena.owner(),
                chunks: arena.chunk_count(),
                live_objects: arena.live_objects(),
                pending_foreign: arena.pending_foreign(),
            });
        }
        arenas.sort_by_key(|a| a.thread);

        let chunks: usize = arenas.iter().map(|a| a.chunks).sum();
        let live: u64 = arenas.iter().map(|a| a.live_objects).sum();
        let used_bytes = live as usize * layout.slot_size;
        PoolSnapshot {
            type_name: core::any::type_name::<T>(),
            slot_size: layout.slot_size,
            slots_per_chunk: layout.slots,
            chunk_count: chunks,
            live_objects: live,
            used_bytes,
            available_bytes: (chunks * layout.slots * layout.slot_size).saturating_sub(used_bytes),
            tags,
            arenas,
        }
    }
}

impl<T, const CHUNK: usize> Drop for PoolAllocator<T, CHUNK> {
    fn drop(&mut self) {
        let live = self.live_objects();
        if live > 0 {
            tracing::warn!(
                pool = self.id,
                live,
                ty = core::any::type_name::<T>(),
                "pool dropped with live objects; their destructors will not run"
            );
        }
        let heap = &self.heap;
        for arena in self.arenas.iter_mut() {
            arena.release_chunks(heap);
        }
        tracing::debug!(pool = self.id, "pool allocator released its chunks");
    }
}
