//! Byte-level memory math shared by all tiers
//!
//! Every offset, alignment and in-place header access in the crate goes
//! through this module, so the arithmetic can be tested without building
//! any allocator around it.

use crate::error::{AllocError, Result};

mod buffer;
pub mod linklist;

pub use buffer::ByteBuffer;
pub use linklist::Linklist;

pub const WORD: usize = core::mem::size_of::<usize>();

#[inline]
pub const fn is_valid_align(align: usize) -> bool {
    align != 0 && align.is_power_of_two()
}

#[inline]
pub fn check_align(align: usize) -> Result<()> {
    if is_valid_align(align) {
        Ok(())
    } else {
        Err(AllocError::InvalidAlignment(align))
    }
}

/// Rounds `addr` up to `align`, which must be a power of two.
#[inline]
pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[inline]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// Bytes to skip from `addr` to reach the next `align` boundary.
#[inline]
pub const fn padding_for(addr: usize, align: usize) -> usize {
    align_up(addr, align) - addr
}

/// Like [`align_up`] but reports overflow instead of wrapping.
#[inline]
pub fn checked_align_up(addr: usize, align: usize) -> Option<usize> {
    Some(addr.checked_add(align - 1)? & !(align - 1))
}
