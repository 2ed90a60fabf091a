//! Chunk geometry and the in-place chunk header
//!
//! ```text
//! chunk base (aligned to the chunk size)
//! +0      address of the owning Arena
//! +WORD   id of the owning pool
//! ...     padding up to the slot alignment
//! first   slot 0 | slot 1 | ... | slot n-1 | unused tail
//! ```

use crate::mm::{align_down, align_up, ByteBuffer, Linklist, WORD};

pub(crate) const CHUNK_HEADER_SIZE: usize = 2 * WORD;

const ARENA_OFF: usize = 0;
const POOL_OFF: usize = WORD;

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Slot geometry of one pool, computed at compile time from the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: usize,
    pub slot_size: usize,
    pub slot_align: usize,
    pub first_slot: usize,
    pub slots: usize,
}

impl ChunkLayout {
    pub const fn new(size: usize, align: usize, chunk_size: usize) -> Self {
        assert!(chunk_size.is_power_of_two(), "chunk size must be a power of two");
        let slot_align = max(align, core::mem::align_of::<usize>());
        assert!(slot_align <= chunk_size, "payload alignment exceeds the chunk size");
        let slot_size = align_up(max(size, WORD), slot_align);
        let first_slot = align_up(CHUNK_HEADER_SIZE, slot_align);
        assert!(
            first_slot + slot_size <= chunk_size,
            "chunk too small for a single slot"
        );
        Self {
            chunk_size,
            slot_size,
            slot_align,
            first_slot,
            slots: (chunk_size - first_slot) / slot_size,
        }
    }

    #[inline]
    pub fn chunk_base(&self, slot: usize) -> usize {
        align_down(slot, self.chunk_size)
    }

    /// Whether `addr` is exactly the start of a slot in its chunk.
    pub fn is_slot_start(&self, addr: usize) -> bool {
        let offset = addr - self.chunk_base(addr);
        offset >= self.first_slot
            && (offset - self.first_slot) % self.slot_size == 0
            && (offset - self.first_slot) / self.slot_size < self.slots
    }
}

/// Accessor for a chunk living at `base`.
pub(crate) struct Chunk {
    buf: ByteBuffer,
}

impl Chunk {
    /// # Safety
    ///
    /// `base` must point to `layout.chunk_size` bytes owned by a pool.
    pub unsafe fn at(base: usize, layout: &ChunkLayout) -> Self {
        Self {
            buf: ByteBuffer::from_raw(base as *mut u8, layout.chunk_size),
        }
    }

    pub fn arena_addr(&self) -> usize {
        unsafe { self.buf.read_word(self.buf.start() + ARENA_OFF) }
    }

    pub fn pool_id(&self) -> u64 {
        unsafe { self.buf.read_word(self.buf.start() + POOL_OFF) as u64 }
    }

    /// Writes the header and threads every slot onto `list`, lowest address
    /// on top.
    ///
    /// # Safety
    ///
    /// Nothing else may be using the chunk's bytes.
    pub unsafe fn format(&self, layout: &ChunkLayout, arena: usize, pool: u64, list: &mut Linklist) {
        let base = self.buf.start();
        self.buf.write_word(base + ARENA_OFF, arena);
        self.buf.write_word(base + POOL_OFF, pool as usize);
        for i in (0..layout.slots).rev() {
            list.push_unchecked((base + layout.first_slot + i * layout.slot_size) as *mut u8);
        }
    }
}
