//! One owner for all three tiers

use crate::config::MemoryConfig;
use crate::diag::{MemoryReport, PoolSnapshot};
use crate::error::Result;
use crate::heap::HeapAllocator;
use crate::linear::LinearRegistry;
use crate::pool::PoolAllocator;
use crate::sync::SpinMutex;
use crate::Tag;
use core::any::{Any, TypeId};
use core::ptr::NonNull;
use std::collections::HashMap;
use std::sync::Arc;

trait PoolStats: Send + Sync {
    fn snapshot(&self) -> PoolSnapshot;
}

impl<T: Send + Sync + 'static> PoolStats for PoolAllocator<T> {
    fn snapshot(&self) -> PoolSnapshot {
        PoolAllocator::snapshot(self)
    }
}

struct PoolEntry {
    pool: Arc<dyn Any + Send + Sync>,
    stats: Arc<dyn PoolStats>,
}

/// The shared heap, one pool per payload type, and per-thread linear
/// regions.
///
/// Pools are created on first use and live as long as the system; dropping
/// the system returns their chunks to the heap and unmaps every region.
pub struct MemorySystem {
    pools: SpinMutex<HashMap<TypeId, PoolEntry>>,
    linear: LinearRegistry,
    heap: Arc<HeapAllocator>,
}

impl MemorySystem {
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let heap = Arc::new(HeapAllocator::with_capacity(config.heap_size)?);
        tracing::debug!(
            heap_size = config.heap_size,
            linear_region_size = config.linear_region_size,
            "memory system ready"
        );
        Ok(Self {
            pools: SpinMutex::new(HashMap::new()),
            linear: LinearRegistry::new(config.linear_region_size),
            heap,
        })
    }

    pub fn heap(&self) -> &Arc<HeapAllocator> {
        &self.heap
    }

    pub fn linear(&self) -> &LinearRegistry {
        &self.linear
    }

    pub fn heap_allocate(&self, size: usize, align: usize, tag: Tag) -> Result<NonNull<u8>> {
        self.heap.allocate(size, align, tag)
    }

    pub fn heap_free(&self, ptr: NonNull<u8>) -> Result<()> {
        self.heap.free(ptr)
    }

    /// The pool for `T`, created on the first request.
    pub fn pool<T: Send + Sync + 'static>(&self) -> Arc<PoolAllocator<T>> {
        let mut pools = self.pools.lock();
        let id = TypeId::of::<T>();
        if let Some(pool) = pools
            .get(&id)
            .and_then(|e| e.pool.clone().downcast::<PoolAllocator<T>>().ok())
        {
            return pool;
        }
        let pool = Arc::new(PoolAllocator::<T>::new(self.heap.clone()));
        pools.insert(
            id,
            PoolEntry {
                pool: pool.clone(),
                stats: pool.clone(),
            },
        );
        pool
    }

    pub fn pool_allocate<T: Send + Sync + 'static>(&self, value: T, tag: Tag) -> Result<NonNull<T>> {
        self.pool::<T>().allocate(value, tag)
    }

    /// # Safety
    ///
    /// Same contract as [`PoolAllocator::free`].
    pub unsafe fn pool_free<T: Send + Sync + 'static>(&self, ptr: NonNull<T>) -> Result<()> {
        self.pool::<T>().free(ptr)
    }

    /// Bump-allocates from the calling thread's region. `None` when the
    /// region is exhausted, the alignment is invalid, or the region could
    /// not be mapped.
    pub fn linear_allocate(&self, size: usize, align: usize, tag: Tag) -> Option<NonNull<u8>> {
        self.linear.local().ok()?.allocate(size, align, tag)
    }

    /// Rewinds the calling thread's region; other threads are unaffected.
    pub fn linear_reset(&self) {
        if let Ok(linear) = self.linear.local() {
            linear.reset();
        }
    }

    pub fn report(&self) -> MemoryReport {
        let stats: Vec<Arc<dyn PoolStats>> =
            self.pools.lock().values().map(|e| e.stats.clone()).collect();
        let mut pools: Vec<PoolSnapshot> = stats.iter().map(|p| p.snapshot()).collect();
        pools.sort_by(|a, b| a.type_name.cmp(b.type_name));
        MemoryReport {
            heap: self.heap.snapshot(),
            pools,
            linear: self.linear.local_snapshot(),
            linear_regions: self.linear.region_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> MemorySystem {
        MemorySystem::new(
            MemoryConfig::default()
                .heap_size(256 * 1024)
                .linear_region_size(4096),
        )
        .unwrap()
    }

    #[test]
    fn same_type_same_pool() {
        let sys = system();
        let a = sys.pool::<u64>();
        let b = sys.pool::<u64>();
        assert!(Arc::ptr_eq(&a, &b));
        let c = sys.pool::<u32>();
        assert_eq!(c.slot_size(), 8);
    }

    #[test]
    fn entry_points_reach_every_tier() {
        let sys = system();
        let h = sys.heap_allocate(100, 16, "heap").unwrap();
        let p = sys.pool_allocate(5u64, "pool").unwrap();
        let l = sys.linear_allocate(64, 8, "linear").unwrap();
        assert_eq!(unsafe { *p.as_ptr() }, 5);
        assert!(sys.heap().contains(h.as_ptr()));
        assert!(sys.heap().contains(p.as_ptr() as *const u8));
        assert!(!sys.heap().contains(l.as_ptr()));

        let report = sys.report();
        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.pools[0].live_objects, 1);
        assert_eq!(report.linear.as_ref().unwrap().allocated, 64);
        assert_eq!(report.linear_regions, 1);
        assert!(report.heap.bytes_by_tag().contains_key("heap"));
        assert!(report.to_string().contains("pool<u64>"));

        sys.heap_free(h).unwrap();
        unsafe { sys.pool_free(p).unwrap() };
        sys.linear_reset();
        let l2 = sys.linear_allocate(64, 8, "linear").unwrap();
        assert_eq!(l, l2);
        sys.heap().check_invariants().unwrap();
    }

    #[test]
    fn dropping_pools_returns_chunks() {
        let sys = system();
        for i in 0..1000u64 {
            sys.pool_allocate(i, "churn").unwrap();
        }
        assert!(sys.heap().used() > 0);
        let heap = sys.heap().clone();
        drop(sys);
        assert_eq!(heap.used(), 0);
    }
}
