//! An in-process, heap-backed [`heap::BreakArena`] for demo scenarios, so
//! this binary can be run anywhere without actually relocating the real
//! process break.

use heap::{ArenaError, BreakArena};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

pub struct SimArena {
    base: *mut u8,
    layout: Layout,
    used: usize,
}

impl SimArena {
    pub fn new(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity, heap::ALIGNMENT).expect("valid layout");
        let base = unsafe { alloc(layout) };
        assert!(!base.is_null(), "failed to reserve simulated arena");
        Self {
            base,
            layout,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for SimArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

impl BreakArena for SimArena {
    fn extend_break(&mut self, n: usize) -> Result<NonNull<u8>, ArenaError> {
        if self.used + n > self.layout.size() {
            return Err(ArenaError::BreakExhausted);
        }
        let ptr = unsafe { self.base.add(self.used) };
        self.used += n;
        Ok(NonNull::new(ptr).expect("non-null offset into a non-null base"))
    }
}
