//! Bump allocation over a per-thread region
//!
//! A [`LinearAllocator`] only ever moves its cursor forward; [`reset`]
//! rewinds it to the start in one step. Nothing is freed individually and no
//! destructors run, so pointers handed out before a reset dangle after it.
//!
//! [`reset`]: LinearAllocator::reset

mod registry;

pub use registry::LinearRegistry;

use crate::diag::LinearSnapshot;
use crate::error::Result;
use crate::mm::{checked_align_up, is_valid_align};
use crate::pal::{MappedRegion, PageHeap};
use crate::Tag;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::collections::BTreeMap;

pub struct LinearAllocator {
    start: usize,
    end: usize,
    current: Cell<usize>,
    tags: RefCell<BTreeMap<Tag, usize>>,
    _region: MappedRegion,
}

impl LinearAllocator {
    pub fn new(size: usize) -> Result<Self> {
        let region = PageHeap::default().map(size)?;
        let start = region.start();
        tracing::debug!(start, size, "linear region ready");
        Ok(Self {
            start,
            end: start + size,
            current: Cell::new(start),
            tags: RefCell::new(BTreeMap::new()),
            _region: region,
        })
    }

    /// Bumps the cursor past `size` bytes aligned to `align`.
    ///
    /// Returns `None` when the region cannot fit the request or `align` is
    /// not a power of two; the cursor is left untouched in both cases.
    pub fn allocate(&self, size: usize, align: usize, tag: Tag) -> Option<NonNull<u8>> {
        if !is_valid_align(align) {
            tracing::error!(align, tag, "linear allocate with invalid alignment");
            return None;
        }
        let cursor = self.current.get();
        let addr = checked_align_up(cursor, align)?;
        let next = match addr.checked_add(size) {
            Some(next) if next <= self.end => next,
            _ => {
                tracing::warn!(size, align, tag, remaining = self.remaining(), "linear region exhausted");
                return None;
            }
        };

        self.current.set(next);
        *self.tags.borrow_mut().entry(tag).or_insert(0) += next - cursor;
        tracing::trace!(addr, size, align, tag, "linear allocate");
        NonNull::new(addr as *mut u8)
    }

    /// Rewinds the cursor to the start and forgets all tag accounting.
    pub fn reset(&self) {
        tracing::trace!(released = self.allocated(), "linear reset");
        self.current.set(self.start);
        self.tags.borrow_mut().clear();
    }

    /// Bytes consumed so far, alignment gaps included.
    pub fn allocated(&self) -> usize {
        self.current.get() - self.start
    }

    pub fn remaining(&self) -> usize {
        self.end - self.current.get()
    }

    pub fn total(&self) -> usize {
        self.end - self.start
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        (self.start..self.end).contains(&(ptr as usize))
    }

    pub fn snapshot(&self, thread: u64) -> LinearSnapshot {
        LinearSnapshot {
            thread,
            total: self.total(),
            allocated: self.allocated(),
            remaining: self.remaining(),
            tags: self.tags.borrow().clone(),
        }
    }
}
