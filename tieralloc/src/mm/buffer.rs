use super::WORD;
use core::ptr;

/// A non-owning view of a raw byte range addressed by absolute addresses.
///
/// All reads and writes are unaligned word accesses, so headers may live
/// at any byte position inside the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteBuffer {
    start: usize,
    len: usize,
}

impl ByteBuffer {
    /// # Safety
    ///
    /// `start..start + len` must stay valid for reads and writes for as long
    /// as this view, or any copy of it, is used.
    pub unsafe fn from_raw(start: *mut u8, len: usize) -> Self {
        Self {
            start: start as usize,
            len,
        }
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }

    #[inline]
    pub fn contains_range(&self, addr: usize, len: usize) -> bool {
        addr >= self.start
            && addr
                .checked_add(len)
                .map_or(false, |end| end <= self.end())
    }

    /// # Safety
    ///
    /// `addr..addr + WORD` must lie inside the buffer.
    #[inline]
    pub unsafe fn read_word(&self, addr: usize) -> usize {
        debug_assert!(self.contains_range(addr, WORD), "read at {:#x} out of range", addr);
        ptr::read_unaligned(addr as *const usize)
    }

    /// # Safety
    ///
    /// `addr..addr + WORD` must lie inside the buffer and must not overlap
    /// bytes anyone else is using.
    #[inline]
    pub unsafe fn write_word(&self, addr: usize, val: usize) {
        debug_assert!(self.contains_range(addr, WORD), "write at {:#x} out of range", addr);
        ptr::write_unaligned(addr as *mut usize, val)
    }

    /// # Safety
    ///
    /// Same as [`ByteBuffer::write_word`] for the whole range.
    #[cfg(any(test, feature = "poison_on_free"))]
    pub unsafe fn fill(&self, addr: usize, len: usize, byte: u8) {
        debug_assert!(self.contains_range(addr, len));
        ptr::write_bytes(addr as *mut u8, byte, len)
    }
}
