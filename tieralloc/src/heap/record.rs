use crate::Tag;

/// Side-table entry kept for every live heap allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    pub tag: Tag,
    /// bytes owned by the allocation, internal padding and tail slack included
    pub size: usize,
    /// bytes in front of the returned address owned by the allocation
    pub padding: usize,
    /// size the caller asked for
    pub requested: usize,
}

impl AllocationRecord {
    /// First byte of the block backing the allocation at `addr`.
    #[inline]
    pub fn block_start(&self, addr: usize) -> usize {
        addr - self.padding
    }

    #[inline]
    pub fn block_end(&self, addr: usize) -> usize {
        self.block_start(addr) + self.size
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub used: usize,
    pub peak_used: usize,
    pub live_allocations: usize,
    pub total_allocations: u64,
    pub total_frees: u64,
    pub failed_allocations: u64,
}

impl HeapStats {
    pub(crate) fn on_allocate(&mut self, charged: usize) {
        self.used += charged;
        self.peak_used = self.peak_used.max(self.used);
        self.live_allocations += 1;
        self.total_allocations += 1;
    }

    pub(crate) fn on_free(&mut self, charged: usize) {
        self.used -= charged;
        self.live_allocations -= 1;
        self.total_frees += 1;
    }
}
