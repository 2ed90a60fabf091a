use super::chunk::{Chunk, ChunkLayout};
use crate::error::{AllocError, Result};
use crate::heap::HeapAllocator;
use crate::mm::Linklist;
use crate::pal::thread::current_thread_id;
use crate::sync::SpinMutex;
use crate::Tag;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::collections::BTreeMap;

pub(crate) const CHUNK_TAG: Tag = "pool chunk";

/// Owner-side allocation counts per tag.
#[derive(Default)]
struct TagCounts {
    counts: BTreeMap<Tag, u64>,
    // `published` missed at least one update
    stale: bool,
}

/// Per-thread slot cache of one pool.
///
/// `local`, `chunks` and `tag_counts` are touched only by the owning thread.
/// Every free, from whichever thread, lands on `foreign`, which the owner
/// drains in one swap when `local` runs dry. The owner copies its tag counts
/// into `published` only when that lock is free, so readers never hold up a
/// pop.
pub(crate) struct Arena {
    owner: u64,
    local: UnsafeCell<Linklist>,
    chunks: UnsafeCell<Vec<NonNull<u8>>>,
    tag_counts: UnsafeCell<TagCounts>,
    foreign: SpinMutex<Linklist>,
    pub(super) published: SpinMutex<BTreeMap<Tag, u64>>,
    chunk_count: AtomicUsize,
    allocated: AtomicU64,
    freed: AtomicU64,
}

// Owner-only fields are never reached from another thread while the arena is
// shared; the remaining state is atomic or behind a lock.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new() -> Self {
        let owner = current_thread_id();
        tracing::debug!(thread = owner, "pool arena created");
        Self {
            owner,
            local: UnsafeCell::new(Linklist::new()),
            chunks: UnsafeCell::new(Vec::new()),
            tag_counts: UnsafeCell::new(TagCounts::default()),
            foreign: SpinMutex::new(Linklist::new()),
            published: SpinMutex::new(BTreeMap::new()),
            chunk_count: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Thread that created the arena. A later thread may inherit it once
    /// the creator exits.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Takes one slot, draining the foreign list and then growing by a chunk
    /// if the local list is empty.
    ///
    /// # Safety
    ///
    /// Must be called only by the thread the arena is currently bound to.
    pub unsafe fn pop(
        &self,
        heap: &HeapAllocator,
        layout: &ChunkLayout,
        pool: u64,
        tag: Tag,
    ) -> Result<NonNull<u8>> {
        let local = &mut *self.local.get();

        let slot = match local.pop_unchecked() {
            Some(slot) => slot,
            None => {
                *local = self.foreign.lock().take();
                if !local.is_empty() {
                    tracing::trace!(thread = self.owner, reclaimed = local.length(), "drained foreign frees");
                } else {
                    self.grow(heap, layout, pool, local)?;
                }
                local
                    .pop_unchecked()
                    .ok_or_else(|| AllocError::Corrupted("fresh pool chunk has no slots".into()))?
            }
        };

        self.allocated.fetch_add(1, Ordering::Relaxed);
        self.count_tag(tag);
        Ok(slot)
    }

    /// Owner-only. Never waits on `published`; a missed update is carried
    /// by the next pop that finds the lock free.
    unsafe fn count_tag(&self, tag: Tag) {
        let own = &mut *self.tag_counts.get();
        let n = own.counts.entry(tag).or_insert(0);
        *n += 1;
        let n = *n;
        match self.published.try_lock() {
            Some(mut published) if own.stale => {
                published.clone_from(&own.counts);
                own.stale = false;
            }
            Some(mut published) => {
                published.insert(tag, n);
            }
            None => own.stale = true,
        }
    }

    /// Hands a slot back to this arena from any thread.
    ///
    /// # Safety
    ///
    /// `slot` must have come from [`Arena::pop`] on this arena and must not be
    /// used again by the caller.
    pub unsafe fn push_foreign(&self, slot: NonNull<u8>) {
        self.foreign.lock().push_unchecked(slot.as_ptr());
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn grow(
        &self,
        heap: &HeapAllocator,
        layout: &ChunkLayout,
        pool: u64,
        local: &mut Linklist,
    ) -> Result<()> {
        let base = heap.allocate(layout.chunk_size, layout.chunk_size, CHUNK_TAG)?;
        let chunk = Chunk::at(base.as_ptr() as usize, layout);
        chunk.format(layout, self as *const Arena as usize, pool, local);
        (*self.chunks.get()).push(base);
        let count = self.chunk_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            thread = self.owner,
            chunk = base.as_ptr() as usize,
            slots = layout.slots,
            chunks = count,
            "pool arena grew"
        );
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count.load(Ordering::Relaxed)
    }

    pub fn live_objects(&self) -> u64 {
        let freed = self.freed.load(Ordering::Relaxed);
        self.allocated.load(Ordering::Relaxed).saturating_sub(freed)
    }

    /// Slots freed but not yet drained by the owner.
    pub fn pending_foreign(&self) -> usize {
        self.foreign.lock().length()
    }

    /// Tag counts as of the owner's last successful publish.
    pub fn tags(&self) -> BTreeMap<Tag, u64> {
        self.published.lock().clone()
    }

    /// Returns every chunk to `heap`. Requires exclusive access, so it is
    /// only reached while the pool is being dropped.
    pub fn release_chunks(&mut self, heap: &HeapAllocator) {
        for chunk in self.chunks.get_mut().drain(..) {
            if let Err(e) = heap.free(chunk) {
                tracing::error!(chunk = chunk.as_ptr() as usize, error = %e, "failed to return pool chunk");
            }
        }
        *self.local.get_mut() = Linklist::new();
        *self.foreign.get_mut() = Linklist::new();
        *self.chunk_count.get_mut() = 0;
    }
}
