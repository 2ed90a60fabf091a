//! underlying system mappings backing the heap and linear regions
use crate::error::{AllocError, Result};
use core::ptr::NonNull;

/// Page Heap
/// An abstraction over the page provider of the platform (mmap, or the
/// system allocator where mmap is unavailable). Pages are always
/// read-write and never executable.
#[derive(Clone, Copy, Default)]
pub struct PageHeap;

pub fn page_size() -> usize {
    page_size::get()
}

pub fn round_to_pages(size: usize) -> usize {
    let pg = page_size();
    (size + pg - 1) / pg * pg
}

/// # Safety
///
/// safe if the size is valid
#[cfg(mmap)]
pub unsafe fn mmap(req: usize) -> *mut u8 {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    #[cfg(linux)]
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
    #[cfg(not(linux))]
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    let ptr = libc::mmap(core::ptr::null_mut(), req, prot, flags, -1, 0);
    // When fail, mmap return MAP_FAILED (-1), not null
    if ptr == libc::MAP_FAILED {
        core::ptr::null_mut()
    } else {
        ptr as *mut u8
    }
}

/// # Safety
///
/// safe if `ptr` and `size` describe a live mapping
#[cfg(mmap)]
pub unsafe fn munmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

#[cfg(not(mmap))]
mod fallback {
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    pub unsafe fn mmap(req: usize) -> *mut u8 {
        match Layout::from_size_align(req, super::page_size()) {
            Ok(layout) => alloc_zeroed(layout),
            Err(_) => core::ptr::null_mut(),
        }
    }

    pub unsafe fn munmap(ptr: *mut u8, size: usize) {
        if let Ok(layout) = Layout::from_size_align(size, super::page_size()) {
            dealloc(ptr, layout);
        }
    }
}
#[cfg(not(mmap))]
pub use fallback::{mmap, munmap};

impl PageHeap {
    /// Maps at least `size` bytes, rounded up to whole pages.
    pub fn map(&self, size: usize) -> Result<MappedRegion> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let len = round_to_pages(size);
        let ptr = unsafe { mmap(len) };
        match NonNull::new(ptr) {
            Some(base) => {
                tracing::debug!(base = ptr as usize, len, "mapped backing region");
                Ok(MappedRegion { base, len })
            }
            None => {
                tracing::error!(len, "backing region mapping failed");
                Err(AllocError::MapFailed { size: len })
            }
        }
    }
}

/// An owned, page-aligned mapping; unmapped on drop.
pub struct MappedRegion {
    base: NonNull<u8>,
    len: usize,
}

// the region is plain memory; whoever owns it decides who touches it
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn start(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn end(&self) -> usize {
        self.start() + self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start() && addr < self.end()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        tracing::debug!(base = self.start(), len = self.len, "unmapping backing region");
        unsafe { munmap(self.base.as_ptr(), self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_works() {
        let region = PageHeap::default().map(0x1000).expect("It does not work");
        assert_eq!(region.start() % page_size(), 0);
        assert!(region.len() >= 0x1000);
        unsafe {
            region.base().as_ptr().write(0xab);
            assert_eq!(region.base().as_ptr().read(), 0xab);
        }
    }

    #[test]
    fn map_rounds_to_pages() {
        let region = PageHeap::default().map(1).unwrap();
        assert_eq!(region.len(), page_size());
        assert!(region.contains(region.start()));
        assert!(!region.contains(region.end()));
    }

    #[test]
    fn zero_sized_map_is_rejected() {
        assert_eq!(PageHeap::default().map(0).err(), Some(AllocError::ZeroSize));
    }
}
