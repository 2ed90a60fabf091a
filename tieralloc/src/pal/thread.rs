use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};

static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CACHED_THREAD_ID: Cell<u64> = Cell::new(0);
}

/// Small, never reused id of the calling thread. Zero is never handed out.
#[inline]
pub fn current_thread_id() -> u64 {
    CACHED_THREAD_ID.with(|id| {
        let cached = id.get();
        if cached != 0 {
            cached
        } else {
            let new_id = THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            id.set(new_id);
            new_id
        }
    })
}
