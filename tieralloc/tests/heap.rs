use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use tieralloc::{AllocError, HeapAllocator};

fn addr(p: NonNull<u8>) -> usize {
    p.as_ptr() as usize
}

#[test]
fn first_fit_reuses_freed_block() {
    let heap = HeapAllocator::with_capacity(1024).unwrap();
    let _a = heap.allocate(40, 16, "a").unwrap();
    let b = heap.allocate(200, 16, "b").unwrap();
    let _c = heap.allocate(64, 16, "c").unwrap();
    heap.free(b).unwrap();
    heap.check_invariants().unwrap();

    let d = heap.allocate(150, 16, "d").unwrap();
    assert_eq!(d, b);
    assert_eq!(addr(d) % 16, 0);
    heap.check_invariants().unwrap();
}

#[test]
fn free_restores_available_bytes() {
    let heap = HeapAllocator::with_capacity(8192).unwrap();
    let keep = heap.allocate(100, 8, "keep").unwrap();
    let before = heap.available();
    let blocks = heap.free_block_count();
    for &(size, align) in &[(1, 1), (24, 8), (100, 64), (1000, 256), (3000, 16)] {
        let p = heap.allocate(size, align, "sample").unwrap();
        heap.free(p).unwrap();
        assert_eq!(heap.available(), before, "size {} align {}", size, align);
        assert_eq!(heap.free_block_count(), blocks);
    }
    heap.free(keep).unwrap();
    assert_eq!(heap.available(), 8192);
    assert_eq!(heap.free_block_count(), 1);
}

#[test]
fn freeing_everything_coalesces_to_one_block() {
    let heap = HeapAllocator::with_capacity(16 * 1024).unwrap();
    let ptrs: Vec<_> = (1..=40)
        .map(|i| heap.allocate(i * 7, 1 << (i % 6), "fill").unwrap())
        .collect();
    // free in an order that exercises left, right and bridging merges
    for p in ptrs.iter().skip(1).step_by(3) {
        heap.free(*p).unwrap();
    }
    for p in ptrs.iter().step_by(3) {
        heap.free(*p).unwrap();
    }
    heap.check_invariants().unwrap();
    for p in ptrs.iter().skip(2).step_by(3).rev() {
        heap.free(*p).unwrap();
    }
    heap.check_invariants().unwrap();
    assert_eq!(heap.free_block_count(), 1);
    assert_eq!(heap.largest_free_block(), 16 * 1024);
    assert_eq!(heap.used(), 0);
}

#[test]
fn exhaust_then_recover() {
    let heap = HeapAllocator::with_capacity(4096).unwrap();
    let mut ptrs = Vec::new();
    loop {
        match heap.allocate(48, 16, "fill") {
            Ok(p) => ptrs.push(p),
            Err(AllocError::OutOfMemory { .. }) => break,
            Err(e) => panic!("unexpected error {}", e),
        }
    }
    assert!(!ptrs.is_empty());
    assert!(heap.stats().failed_allocations >= 1);
    for p in ptrs {
        heap.free(p).unwrap();
    }
    assert_eq!(heap.available(), 4096);
    heap.allocate(4096, 1, "whole").unwrap();
}

/// Random allocate/free storm. Every live block is stamped with its own byte
/// pattern, so any overlap between allocations shows up as a mismatch.
#[test]
fn random_storm_keeps_invariants() {
    let mut rng = StdRng::seed_from_u64(0x7ea1_a110c);
    let heap = HeapAllocator::with_capacity(64 * 1024).unwrap();
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for step in 0..5000u32 {
        let grow = live.is_empty() || rng.gen_bool(0.55);
        if grow {
            let size = rng.gen_range(1..768);
            let align = 1usize << rng.gen_range(0..8);
            match heap.allocate(size, align, "storm") {
                Ok(p) => {
                    assert_eq!(addr(p) % align, 0);
                    let stamp = step as u8;
                    unsafe { std::ptr::write_bytes(p.as_ptr(), stamp, size) };
                    live.push((p, size, stamp));
                }
                Err(AllocError::OutOfMemory { .. }) => {}
                Err(e) => panic!("unexpected error {}", e),
            }
        } else {
            let (p, size, stamp) = live.swap_remove(rng.gen_range(0..live.len()));
            let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), size) };
            assert!(bytes.iter().all(|&b| b == stamp), "block at {:#x} overwritten", addr(p));
            heap.free(p).unwrap();
        }
        if step % 100 == 0 {
            heap.check_invariants().unwrap();
        }
    }

    for (p, _, _) in live.drain(..) {
        heap.free(p).unwrap();
    }
    heap.check_invariants().unwrap();
    assert_eq!(heap.free_block_count(), 1);
    assert_eq!(heap.available(), 64 * 1024);
}

#[test]
fn shared_between_threads() {
    let heap = Arc::new(HeapAllocator::with_capacity(1 << 20).unwrap());
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let heap = heap.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                let mut mine = Vec::new();
                for _ in 0..2000 {
                    if mine.len() < 32 && rng.gen_bool(0.6) {
                        let size = rng.gen_range(8..512);
                        mine.push(heap.allocate(size, 16, "worker").unwrap());
                    } else if let Some(p) = mine.pop() {
                        heap.free(p).unwrap();
                    }
                }
                for p in mine {
                    heap.free(p).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    heap.check_invariants().unwrap();
    assert_eq!(heap.used(), 0);
    assert_eq!(heap.stats().live_allocations, 0);
}
