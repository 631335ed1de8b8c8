//! Property-based tests against the public `HeapManager` API, driven by a
//! fake in-memory arena so no test touches the real process break.

use heap::{ArenaError, BreakArena, HeapManager, HEADER_SIZE};
use proptest::prelude::*;
use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::collections::BTreeMap;

/// Carves spans out of one oversized, alignment-satisfying system
/// allocation. Exhausts deterministically once `capacity` is spent.
struct FakeArena {
    base: *mut u8,
    layout: Layout,
    used: Cell<usize>,
}

impl FakeArena {
    fn new(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity, heap::ALIGNMENT).unwrap();
        let base = unsafe { alloc(layout) };
        assert!(!base.is_null());
        Self {
            base,
            layout,
            used: Cell::new(0),
        }
    }
}

impl Drop for FakeArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

impl BreakArena for FakeArena {
    fn extend_break(&mut self, n: usize) -> Result<std::ptr::NonNull<u8>, ArenaError> {
        let used = self.used.get();
        if used + n > self.layout.size() {
            return Err(ArenaError::BreakExhausted);
        }
        let ptr = unsafe { self.base.add(used) };
        self.used.set(used + n);
        Ok(std::ptr::NonNull::new(ptr).unwrap())
    }
}

fn manager(capacity: usize) -> HeapManager<FakeArena> {
    HeapManager::new(FakeArena::new(capacity))
}

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Free(usize),
    Realloc(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..4096).prop_map(Op::Alloc),
        (0usize..64).prop_map(Op::Free),
        (0usize..64, 1usize..4096).prop_map(|(i, s)| Op::Realloc(i, s)),
    ]
}

proptest! {
    /// Round-trip law: allocating and immediately freeing never corrupts the
    /// region chain, and a later allocation of the same size reuses the slot.
    #[test]
    fn round_trip_alloc_free_alloc(size in 1usize..8192) {
        let mut m = manager(1 << 20);
        let regions_before = m.regions().count();
        let p = m.allocate(size).unwrap();
        m.free(Some(p));
        let q = m.allocate(size).unwrap();
        prop_assert_eq!(p, q);
        prop_assert_eq!(m.regions().count(), regions_before + 1);
    }

    /// `free(None)` and `reallocate(None, 0)` are no-ops, never panics.
    #[test]
    fn idempotent_null_operations(size in 0usize..4096) {
        let mut m = manager(1 << 16);
        m.free(None);
        let r = m.reallocate(None, 0);
        prop_assert!(r.is_none());
        let _ = size;
    }

    /// Shrinking a live allocation never moves its address.
    #[test]
    fn shrink_is_address_stable(initial in 256usize..8192, smaller in 1usize..256) {
        let mut m = manager(1 << 20);
        let p = m.allocate(initial).unwrap();
        let q = m.reallocate(Some(p), smaller).unwrap();
        prop_assert_eq!(p, q);
    }

    /// Growing an allocation, by whichever path, preserves the original
    /// bytes up to the original length.
    #[test]
    fn grow_preserves_prefix(initial in 1usize..512, grown in 513usize..8192, fill in 0u8..=255) {
        let mut m = manager(1 << 20);
        let p = m.allocate(initial).unwrap();
        unsafe { std::ptr::write_bytes(p.as_ptr(), fill, initial) };
        let q = m.reallocate(Some(p), grown).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), initial) };
        prop_assert!(bytes.iter().all(|&b| b == fill));
    }

    /// `zero_allocate` always returns a fully zeroed payload, including when
    /// the backing region previously held nonzero bytes.
    #[test]
    fn zero_allocate_is_always_zero(size in 1usize..4096, fill in 1u8..=255) {
        let mut m = manager(1 << 20);
        let p = m.allocate(size).unwrap();
        unsafe { std::ptr::write_bytes(p.as_ptr(), fill, size) };
        m.free(Some(p));

        let q = m.zero_allocate(1, size).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), size) };
        prop_assert!(bytes.iter().all(|&b| b == 0));
    }

    /// No two physically adjacent regions are ever both free: after any
    /// sequence of alloc/free/realloc, the reclaimer's bounded coalesce must
    /// have merged every such pair away.
    #[test]
    fn no_adjacent_free_regions(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut m = manager(1 << 22);
        let mut live: BTreeMap<usize, std::ptr::NonNull<u8>> = BTreeMap::new();
        let mut next_id = 0usize;

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    if let Some(p) = m.allocate(size) {
                        live.insert(next_id, p);
                        next_id += 1;
                    }
                }
                Op::Free(key) => {
                    if let Some((_, p)) = live.iter().nth(key % live.len().max(1)) {
                        let p = *p;
                        let id = *live.iter().find(|(_, v)| **v == p).unwrap().0;
                        m.free(Some(p));
                        live.remove(&id);
                    }
                }
                Op::Realloc(key, size) => {
                    if !live.is_empty() {
                        let idx = key % live.len();
                        let (&id, &p) = live.iter().nth(idx).unwrap();
                        if let Some(q) = m.reallocate(Some(p), size) {
                            live.insert(id, q);
                        } else {
                            live.remove(&id);
                        }
                    }
                }
            }

            let snapshots: std::vec::Vec<_> = m.regions().collect();
            for pair in snapshots.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let adjacent = a.addr + a.total_size == b.addr;
                if adjacent {
                    prop_assert!(
                        !(a.used_payload == 0 && b.used_payload == 0),
                        "adjacent free regions at {:#x} and {:#x}",
                        a.addr,
                        b.addr
                    );
                }
            }
        }

        for (_, p) in live {
            m.free(Some(p));
        }
    }

    /// Every byte claimed by the arena is accounted for by exactly one
    /// region header plus its payload (used or free).
    #[test]
    fn conservation_of_arena_bytes(sizes in prop::collection::vec(1usize..4096, 0..32)) {
        let mut m = manager(1 << 22);
        let mut live = std::vec::Vec::new();
        for s in sizes {
            if let Some(p) = m.allocate(s) {
                live.push(p);
            }
        }

        let regions: std::vec::Vec<_> = m.regions().collect();
        let total: usize = regions.iter().map(|r| r.total_size).sum();
        let span = match (regions.first(), regions.last()) {
            (Some(first), Some(last)) => last.addr + last.total_size - first.addr,
            _ => 0,
        };
        prop_assert_eq!(total, span);
        prop_assert!(regions.iter().all(|r| r.total_size >= HEADER_SIZE));

        for p in live {
            m.free(Some(p));
        }
    }
}
