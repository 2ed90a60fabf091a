use core::ptr::{self, NonNull};

/// Intrusive LIFO list threaded through free slots.
///
/// Each free slot stores the address of the next one in its first word, so
/// every slot pushed here must be at least a word long and word aligned.
#[derive(Clone, Copy, Debug, Default)]
pub struct Linklist {
    pub link: usize,
    pub length: usize,
}

impl Linklist {
    pub const fn new() -> Self {
        Self { link: 0, length: 0 }
    }

    /// # Safety
    ///
    /// `ptr` must be a free, word-aligned slot of at least one word that
    /// nobody else reads or writes while it sits in the list.
    pub unsafe fn push_unchecked(&mut self, ptr: *mut u8) {
        debug_assert_ne!(ptr as usize, 0);
        debug_assert_eq!(ptr as usize % core::mem::align_of::<usize>(), 0);
        let target = ptr as *mut usize;
        ptr::write(target, self.link);

        self.link = target as usize;
        self.length += 1;
    }

    /// # Safety
    ///
    /// Every slot in the list must still be untouched since it was pushed.
    pub unsafe fn pop_unchecked(&mut self) -> Option<NonNull<u8>> {
        if self.link == 0 {
            debug_assert_eq!(self.length, 0);
            return None;
        }

        let result = self.link;
        self.link = ptr::read(result as *const usize);
        self.length -= 1;
        NonNull::new(result as *mut u8)
    }

    /// Detaches the whole chain, leaving this list empty. O(1).
    pub fn take(&mut self) -> Linklist {
        core::mem::take(self)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.link == 0
    }

    /// Walks the chain and counts nodes.
    ///
    /// # Safety
    ///
    /// Same requirement as [`Linklist::pop_unchecked`].
    #[cfg(test)]
    pub unsafe fn count_nodes(&self) -> usize {
        let mut counter = 0;
        let mut head = self.link;
        while head != 0 {
            counter += 1;
            head = ptr::read(head as *const usize);
        }
        counter
    }
}
