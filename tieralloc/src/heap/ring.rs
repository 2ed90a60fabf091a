//! Circular, address-ordered free list living inside the heap's own bytes.
//!
//! Entry layout at the entry's address:
//!
//! ```text
//! +0     size of the free block in bytes (header included)
//! +WORD  address of the next entry
//! ```
//!
//! `head` is the lowest-addressed entry and `tail` the highest, with
//! `tail.next == head`. No two entries are ever adjacent in memory.

use crate::mm::{checked_align_up, ByteBuffer, WORD};

pub(crate) const ENTRY_SIZE: usize = 2 * WORD;

const SIZE_OFF: usize = 0;
const NEXT_OFF: usize = WORD;

/// Result of carving an allocation out of a free block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Carved {
    /// aligned address handed to the caller
    pub addr: usize,
    /// bytes removed from the free pool: internal padding, payload and tail slack
    pub charged: usize,
    /// padding in front of `addr` owned by the allocation
    pub padding: usize,
}

pub(crate) struct FreeRing {
    buf: ByteBuffer,
    head: Option<usize>,
    tail: Option<usize>,
    blocks: usize,
    free_bytes: usize,
}

impl FreeRing {
    /// Formats the whole buffer as one free block.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for the ring's lifetime and used by nothing else
    /// except the allocations the ring hands out.
    pub unsafe fn new(buf: ByteBuffer) -> Self {
        debug_assert!(buf.len() >= ENTRY_SIZE);
        let mut ring = Self {
            buf,
            head: None,
            tail: None,
            blocks: 0,
            free_bytes: 0,
        };
        ring.release(buf.start(), buf.len());
        ring
    }

    #[inline]
    fn size_of(&self, entry: usize) -> usize {
        unsafe { self.buf.read_word(entry + SIZE_OFF) }
    }

    #[inline]
    fn next_of(&self, entry: usize) -> usize {
        unsafe { self.buf.read_word(entry + NEXT_OFF) }
    }

    #[inline]
    fn set_size(&mut self, entry: usize, size: usize) {
        unsafe { self.buf.write_word(entry + SIZE_OFF, size) }
    }

    #[inline]
    fn set_next(&mut self, entry: usize, next: usize) {
        unsafe { self.buf.write_word(entry + NEXT_OFF, next) }
    }

    #[inline]
    fn write_entry(&mut self, entry: usize, size: usize, next: usize) {
        debug_assert!(size >= ENTRY_SIZE);
        self.set_size(entry, size);
        self.set_next(entry, next);
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    #[cfg(test)]
    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    #[cfg(test)]
    pub fn buffer(&self) -> ByteBuffer {
        self.buf
    }

    /// Walks the ring once from head, yielding `(address, size)`.
    pub fn iter(&self) -> RingIter<'_> {
        RingIter {
            ring: self,
            cur: self.head,
            remaining: self.blocks,
        }
    }

    pub fn largest_block(&self) -> usize {
        self.iter().map(|(_, size)| size).max().unwrap_or(0)
    }

    /// First-fit scan from head. Splits off the tail of the chosen block and
    /// carves or folds the alignment padding in front of it when possible.
    /// Requests smaller than an entry are rounded up to one.
    pub fn carve(&mut self, req: usize, align: usize) -> Option<Carved> {
        // every allocated range must be able to host an entry once released
        let req = req.max(ENTRY_SIZE);
        let head = self.head?;
        let mut prev = self.tail?;
        let mut cur = head;
        loop {
            let size = self.size_of(cur);
            if let Some(payload) = checked_align_up(cur, align) {
                let padding = payload - cur;
                if padding.checked_add(req).map_or(false, |need| need <= size) {
                    return Some(self.take_block(prev, cur, size, payload, req));
                }
            }
            prev = cur;
            cur = self.next_of(cur);
            if cur == head {
                return None;
            }
        }
    }

    fn take_block(
        &mut self,
        prev: usize,
        cur: usize,
        size: usize,
        payload: usize,
        req: usize,
    ) -> Carved {
        let next = self.next_of(cur);
        let single = next == cur;
        let padding = payload - cur;
        let alloc_end = payload + req;
        let remainder = cur + size - alloc_end;

        let mut internal = 0;
        let mut pad_entry = None;
        if padding > 0 {
            if !single && prev + self.size_of(prev) == cur {
                let grown = self.size_of(prev) + padding;
                self.set_size(prev, grown);
            } else if padding >= ENTRY_SIZE {
                pad_entry = Some(cur);
            } else {
                internal = padding;
            }
        }

        let mut slack = 0;
        let rem_entry = if remainder >= ENTRY_SIZE {
            Some(alloc_end)
        } else {
            slack = remainder;
            None
        };

        let was_head = self.head == Some(cur);
        let was_tail = self.tail == Some(cur);

        match (pad_entry, rem_entry) {
            (None, None) => {
                if single {
                    self.head = None;
                    self.tail = None;
                } else {
                    self.set_next(prev, next);
                    if was_head {
                        self.head = Some(next);
                    }
                    if was_tail {
                        self.tail = Some(prev);
                    }
                }
                self.blocks -= 1;
            }
            (pad, rem) => {
                let first = pad.or(rem).unwrap_or(cur);
                let last = rem.or(pad).unwrap_or(cur);
                let after = if single { first } else { next };
                if let Some(pad) = pad_entry {
                    let pad_next = rem_entry.unwrap_or(after);
                    self.write_entry(pad, padding, pad_next);
                }
                if let Some(rem) = rem_entry {
                    self.write_entry(rem, remainder, after);
                }
                if single {
                    self.head = Some(first);
                    self.tail = Some(last);
                } else {
                    self.set_next(prev, first);
                    if was_head {
                        self.head = Some(first);
                    }
                    if was_tail {
                        self.tail = Some(last);
                    }
                }
                if pad_entry.is_some() && rem_entry.is_some() {
                    self.blocks += 1;
                }
            }
        }

        let charged = internal + req + slack;
        self.free_bytes -= charged;
        Carved {
            addr: payload,
            charged,
            padding: internal,
        }
    }

    /// Returns `start..start + len` to the ring, merging with free neighbours.
    pub fn release(&mut self, start: usize, len: usize) {
        debug_assert!(self.buf.contains_range(start, len));
        debug_assert!(len >= ENTRY_SIZE);
        let end = start + len;
        self.free_bytes += len;

        let head = match self.head {
            Some(head) => head,
            None => {
                self.write_entry(start, len, start);
                self.head = Some(start);
                self.tail = Some(start);
                self.blocks = 1;
                return;
            }
        };

        let mut left = None;
        let mut right = None;
        let mut nearest_left: Option<usize> = None;
        let mut prev = self.tail.unwrap_or(head);
        let mut cur = head;
        loop {
            let size = self.size_of(cur);
            debug_assert!(
                cur + size <= start || cur >= end,
                "released range {:#x}..{:#x} overlaps free block {:#x}",
                start,
                end,
                cur
            );
            if cur + size == start {
                left = Some(cur);
            }
            if cur == end {
                right = Some((prev, cur));
            }
            if cur < start && nearest_left.map_or(true, |l| cur > l) {
                nearest_left = Some(cur);
            }
            prev = cur;
            cur = self.next_of(cur);
            if cur == head {
                break;
            }
        }

        match (left, right) {
            (Some(l), Some((r_prev, r))) => {
                let merged = self.size_of(l) + len + self.size_of(r);
                self.set_size(l, merged);
                self.unlink(r_prev, r);
            }
            (Some(l), None) => {
                let merged = self.size_of(l) + len;
                self.set_size(l, merged);
            }
            (None, Some((r_prev, r))) => {
                let merged = len + self.size_of(r);
                let r_next = self.next_of(r);
                if r_next == r {
                    self.write_entry(start, merged, start);
                } else {
                    self.write_entry(start, merged, r_next);
                    self.set_next(r_prev, start);
                }
                if self.head == Some(r) {
                    self.head = Some(start);
                }
                if self.tail == Some(r) {
                    self.tail = Some(start);
                }
            }
            (None, None) => {
                match nearest_left {
                    Some(l) => {
                        let n = self.next_of(l);
                        self.write_entry(start, len, n);
                        self.set_next(l, start);
                        if self.tail == Some(l) {
                            self.tail = Some(start);
                        }
                    }
                    None => {
                        let tail = self.tail.unwrap_or(head);
                        self.write_entry(start, len, head);
                        self.set_next(tail, start);
                        self.head = Some(start);
                    }
                }
                self.blocks += 1;
            }
        }
    }

    fn unlink(&mut self, prev: usize, node: usize) {
        let next = self.next_of(node);
        debug_assert_ne!(next, node, "unlinking the only entry");
        self.set_next(prev, next);
        if self.head == Some(node) {
            self.head = Some(next);
        }
        if self.tail == Some(node) {
            self.tail = Some(prev);
        }
        self.blocks -= 1;
    }

    /// Full structural check of the ring; describes the first problem found.
    pub fn check(&self) -> Result<(), String> {
        let (head, tail) = match (self.head, self.tail) {
            (None, None) => {
                if self.blocks != 0 || self.free_bytes != 0 {
                    return Err(format!(
                        "empty ring reports {} blocks / {} bytes",
                        self.blocks, self.free_bytes
                    ));
                }
                return Ok(());
            }
            (Some(h), Some(t)) => (h, t),
            _ => return Err("head and tail disagree about emptiness".into()),
        };

        let limit = self.buf.len() / ENTRY_SIZE + 1;
        let mut seen = 0;
        let mut total = 0;
        let mut cur = head;
        loop {
            if !self.buf.contains_range(cur, ENTRY_SIZE) {
                return Err(format!("entry {:#x} outside the backing buffer", cur));
            }
            let size = self.size_of(cur);
            if size < ENTRY_SIZE || !self.buf.contains_range(cur, size) {
                return Err(format!("entry {:#x} has bad size {}", cur, size));
            }
            seen += 1;
            total += size;
            if seen > limit {
                return Err("ring does not return to head".into());
            }
            let next = self.next_of(cur);
            if next == head {
                if cur != tail {
                    return Err(format!("ring closes at {:#x}, tail is {:#x}", cur, tail));
                }
                break;
            }
            if next <= cur {
                return Err(format!("entry {:#x} links back to {:#x}", cur, next));
            }
            if cur + size >= next {
                return Err(format!("entries {:#x} and {:#x} touch or overlap", cur, next));
            }
            cur = next;
        }

        if seen != self.blocks {
            return Err(format!("walked {} entries, expected {}", seen, self.blocks));
        }
        if total != self.free_bytes {
            return Err(format!("free bytes {} but counter says {}", total, self.free_bytes));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) unsafe fn from_entries(buf: ByteBuffer, entries: &[(usize, usize)]) -> Self {
        let mut ring = Self {
            buf,
            head: entries.first().map(|e| e.0),
            tail: entries.last().map(|e| e.0),
            blocks: entries.len(),
            free_bytes: entries.iter().map(|e| e.1).sum(),
        };
        for (i, &(addr, size)) in entries.iter().enumerate() {
            let next = entries[(i + 1) % entries.len()].0;
            ring.write_entry(addr, size, next);
        }
        ring
    }
}

pub(crate) struct RingIter<'a> {
    ring: &'a FreeRing,
    cur: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let cur = self.cur?;
        self.remaining -= 1;
        self.cur = Some(self.ring.next_of(cur));
        Some((cur, self.ring.size_of(cur)))
    }
}
