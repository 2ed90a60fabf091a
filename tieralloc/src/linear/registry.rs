use super::LinearAllocator;
use crate::config::LINEAR_REGION_SIZE;
use crate::diag::LinearSnapshot;
use crate::error::Result;
use crate::pal::thread::current_thread_id;
use core::sync::atomic::{AtomicUsize, Ordering};
use thread_local::ThreadLocal;

/// Hands every thread its own [`LinearAllocator`], created on first use.
///
/// Regions are kept until the registry is dropped; a thread that exits
/// leaves its region to be inherited by a later thread.
pub struct LinearRegistry {
    default_size: usize,
    regions: ThreadLocal<LinearAllocator>,
    created: AtomicUsize,
}

impl Default for LinearRegistry {
    fn default() -> Self {
        Self::new(LINEAR_REGION_SIZE)
    }
}

impl LinearRegistry {
    pub fn new(default_size: usize) -> Self {
        Self {
            default_size,
            regions: ThreadLocal::new(),
            created: AtomicUsize::new(0),
        }
    }

    pub fn default_size(&self) -> usize {
        self.default_size
    }

    /// The calling thread's allocator, mapped with the default size on
    /// first use.
    pub fn local(&self) -> Result<&LinearAllocator> {
        self.local_sized(self.default_size)
    }

    /// Like [`local`](Self::local), but a region created by this call gets
    /// `size` bytes. Has no effect on a thread that already has one.
    pub fn local_sized(&self, size: usize) -> Result<&LinearAllocator> {
        self.regions.get_or_try(|| {
            LinearAllocator::new(size).map(|linear| {
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(thread = current_thread_id(), size, "thread linear region created");
                linear
            })
        })
    }

    pub fn with_local<R>(&self, f: impl FnOnce(&LinearAllocator) -> R) -> Result<R> {
        self.local().map(f)
    }

    pub fn with_local_sized<R>(&self, size: usize, f: impl FnOnce(&LinearAllocator) -> R) -> Result<R> {
        self.local_sized(size).map(f)
    }

    /// Number of regions mapped so far across all threads.
    pub fn region_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Snapshot of the calling thread's region, if it has one.
    pub fn local_snapshot(&self) -> Option<LinearSnapshot> {
        self.regions
            .get()
            .map(|linear| linear.snapshot(current_thread_id()))
    }
}
