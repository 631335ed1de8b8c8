//! Allocation, reallocation, free, and the splitter/coalescer that ties the
//! free lists to the physically-ordered region chain.

use crate::arena::{ArenaError, BreakArena};
use crate::free_list::FreeLists;
use crate::region::{
    align_up, class_of, RegionHeader, ALIGNMENT, HEADER_SIZE, MIN_CLASS, MIN_REGION_SIZE,
    SPECULATIVE_TRIES,
};
use core::cmp::max;
use core::ptr::NonNull;

/// Owns every piece of process-wide heap state: the free lists and the
/// physically-ordered region chain, anchored by `last_region`.
///
/// Generic over [`BreakArena`] so the same splitting/coalescing/allocation
/// policy drives both the hosted `sbrk`-backed arena (`heap-sys`) and, in
/// tests, an in-memory fake that never touches the real process break.
pub struct HeapManager<A: BreakArena> {
    arena: A,
    free_lists: FreeLists,
    last_region: Option<NonNull<RegionHeader>>,
}

// SAFETY: `HeapManager` is never accessed concurrently — this crate's
// contract (see spec §5) is strictly single-threaded. `heap-sys` places one
// instance behind a mutex purely to satisfy `Sync` for a `static`; the
// borrow there is always uncontended.
unsafe impl<A: BreakArena + Send> Send for HeapManager<A> {}

/// A read-only snapshot of one region, for diagnostics and tests. Carries no
/// pointers a caller could use to violate the manager's exclusive ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSnapshot {
    /// Address of the region's header.
    pub addr: usize,
    /// Full span length, header included.
    pub total_size: usize,
    /// Bytes currently owned by the client, or 0 if the region is free.
    pub used_payload: usize,
}

impl<A: BreakArena> HeapManager<A> {
    /// Build a manager over `arena`, with no regions yet.
    pub const fn new(arena: A) -> Self {
        Self {
            arena,
            free_lists: FreeLists::new(),
            last_region: None,
        }
    }

    /// Allocate `s` bytes, returning an `ALIGNMENT`-aligned pointer or `None`
    /// on `s == 0` or arena exhaustion.
    pub fn allocate(&mut self, s: usize) -> Option<NonNull<u8>> {
        if s == 0 {
            return None;
        }

        let class = class_of(s);

        // Speculative probe: a non-power-of-two request may be satisfied
        // exactly by a recently freed region sitting one class below, which
        // an ascending search alone would skip past.
        if class > MIN_CLASS && !s.is_power_of_two() {
            if let Some(region) = self.free_lists.probe(class - 1, s, SPECULATIVE_TRIES) {
                unsafe { self.free_lists.remove(region) };
                return Some(self.commit(region, s));
            }
        }

        if let Some(region) = self.free_lists.first_fit_from(class) {
            unsafe { self.free_lists.remove(region) };
            return Some(self.commit(region, s));
        }

        let region = self.extend_for(s).ok()?;
        Some(unsafe { region.as_ref().payload_ptr() })
    }

    /// Release a previously allocated payload. No-op on `None`.
    pub fn free(&mut self, p: Option<NonNull<u8>>) {
        let Some(p) = p else { return };
        let mut region = unsafe { RegionHeader::from_payload(p) };
        debug_assert!(unsafe { region.as_ref().used_payload } > 0, "double free");
        unsafe { region.as_mut().used_payload = 0 };
        self.reclaim(region);
    }

    /// Resize a previously allocated payload in place where possible,
    /// falling back to allocate-copy-free. See spec §4.6 for the full
    /// decision order.
    pub fn reallocate(&mut self, p: Option<NonNull<u8>>, s: usize) -> Option<NonNull<u8>> {
        let Some(p) = p else {
            return self.allocate(s);
        };
        if s == 0 {
            self.free(Some(p));
            return None;
        }

        let mut region = unsafe { RegionHeader::from_payload(p) };
        let used = unsafe { region.as_ref().used_payload };

        if s == used {
            return Some(p);
        }
        if s < used {
            unsafe { region.as_mut().used_payload = s };
            self.maybe_split(region, s);
            return Some(p);
        }
        if s <= unsafe { region.as_ref().max_payload() } {
            unsafe { region.as_mut().used_payload = s };
            return Some(p);
        }
        if let Some(grown) = self.try_absorb_right_for_grow(region, s) {
            return Some(grown);
        }

        let q = self.allocate(s)?;
        unsafe { core::ptr::copy_nonoverlapping(p.as_ptr(), q.as_ptr(), used) };
        self.free(Some(p));
        Some(q)
    }

    /// Allocate `s` bytes and zero them. `nmemb` is accepted but ignored —
    /// this mirrors a quirk in the reference design (see spec §4.8/§9):
    /// the request is `s` bytes, not `nmemb * s`.
    pub fn zero_allocate(&mut self, _nmemb: usize, s: usize) -> Option<NonNull<u8>> {
        let q = self.allocate(s)?;
        unsafe { core::ptr::write_bytes(q.as_ptr(), 0, s) };
        Some(q)
    }

    /// Walk every live region from the lowest address to the highest, for
    /// diagnostics and tests. Carries no pointers, only byte-range data.
    pub fn regions(&self) -> RegionIter<'_, A> {
        let mut first = self.last_region;
        while let Some(region) = first {
            match unsafe { region.as_ref().prev } {
                Some(prev) => first = Some(prev),
                None => break,
            }
        }
        RegionIter {
            manager: self,
            current: first,
        }
    }

    /// Mark a free region found in a free list as used for `s` bytes, split
    /// off its leftover tail if large enough, and return its payload.
    fn commit(&mut self, mut region: NonNull<RegionHeader>, s: usize) -> NonNull<u8> {
        unsafe { region.as_mut().used_payload = s };
        self.maybe_split(region, s);
        unsafe { region.as_ref().payload_ptr() }
    }

    /// Split `region`'s leftover tail into a new free region when there is
    /// enough slack to hold a minimal region plus worst-case alignment
    /// padding (spec §4.3). Declines otherwise, leaving the slack as unused
    /// payload inside `region`.
    fn maybe_split(&mut self, mut region: NonNull<RegionHeader>, used: usize) {
        let (region_addr, region_end, max_payload) = unsafe {
            let r = region.as_ref();
            (r.addr(), r.end(), r.max_payload())
        };
        let leftover = max_payload - used;
        if leftover < MIN_REGION_SIZE + ALIGNMENT {
            return;
        }

        let split_addr = align_up(region_addr + HEADER_SIZE + used, ALIGNMENT);
        let new_total = region_end - split_addr;
        debug_assert!(new_total >= MIN_REGION_SIZE);

        unsafe { region.as_mut().total_size = split_addr - region_addr };

        // SAFETY: `split_addr` lies strictly inside the arena span `region`
        // was carved from (or extended into), is `ALIGNMENT`-aligned, and is
        // not yet referenced by any other region.
        let mut new_region =
            unsafe { NonNull::new_unchecked(split_addr as *mut RegionHeader) };
        unsafe {
            new_region.as_mut().total_size = new_total;
            new_region.as_mut().used_payload = 0;
        }

        self.link_after(region, new_region);
        unsafe { self.free_lists.insert(new_region) };
    }

    /// Splice `new_node` into the physical chain immediately after `prev`,
    /// updating `last_region` if `prev` was the tail.
    fn link_after(&mut self, mut prev: NonNull<RegionHeader>, mut new_node: NonNull<RegionHeader>) {
        unsafe {
            let old_next = prev.as_ref().next;
            new_node.as_mut().prev = Some(prev);
            new_node.as_mut().next = old_next;
            prev.as_mut().next = Some(new_node);
            match old_next {
                Some(mut next) => next.as_mut().prev = Some(new_node),
                None => self.last_region = Some(new_node),
            }
        }
    }

    /// True when `a.next == Some(b)` and the two are physically contiguous
    /// (no alignment-padding gap between them).
    fn adjacent(&self, a: NonNull<RegionHeader>, b: NonNull<RegionHeader>) -> bool {
        unsafe { a.as_ref().next == Some(b) && a.as_ref().end() == b.as_ref().addr() }
    }

    /// Merge `from` into `into`: grows `into` by `from`'s full span, splices
    /// `from` out of the physical chain, and moves `last_region` onto `into`
    /// if `from` was the tail. Does not touch the free lists.
    fn absorb(&mut self, mut into: NonNull<RegionHeader>, from: NonNull<RegionHeader>) {
        unsafe {
            let from_total = from.as_ref().total_size;
            let from_next = from.as_ref().next;
            into.as_mut().total_size += from_total;
            into.as_mut().next = from_next;
            if let Some(mut next) = from_next {
                next.as_mut().prev = Some(into);
            }
            if self.last_region == Some(from) {
                self.last_region = Some(into);
            }
        }
    }

    /// Coalesce a newly freed `region` with its physically adjacent free
    /// neighbors (at most one on each side, since the no-adjacent-frees
    /// invariant holds before this call), then insert whatever remains into
    /// its size class. Spec §4.3.
    fn reclaim(&mut self, region: NonNull<RegionHeader>) {
        let mut merged = region;

        if let Some(prev) = unsafe { merged.as_ref().prev } {
            if self.adjacent(prev, merged) && unsafe { prev.as_ref().is_free() } {
                unsafe { self.free_lists.remove(prev) };
                self.absorb(prev, merged);
                merged = prev;
            }
        }

        if let Some(next) = unsafe { merged.as_ref().next } {
            if self.adjacent(merged, next) && unsafe { next.as_ref().is_free() } {
                unsafe { self.free_lists.remove(next) };
                self.absorb(merged, next);
            }
        }

        unsafe { self.free_lists.insert(merged) };
    }

    /// Grow `region` in place by absorbing its free right neighbor, if one
    /// exists, is adjacent, and is large enough for `s`. Spec §4.6.
    fn try_absorb_right_for_grow(
        &mut self,
        mut region: NonNull<RegionHeader>,
        s: usize,
    ) -> Option<NonNull<u8>> {
        let next = unsafe { region.as_ref().next }?;
        if !self.adjacent(region, next) || !unsafe { next.as_ref().is_free() } {
            return None;
        }
        let capacity = unsafe { region.as_ref().max_payload() + next.as_ref().total_size };
        if s > capacity {
            return None;
        }

        unsafe { self.free_lists.remove(next) };
        self.absorb(region, next);
        unsafe { region.as_mut().used_payload = s };
        Some(unsafe { region.as_ref().payload_ptr() })
    }

    /// Request a new span from the arena large enough for `s` bytes plus a
    /// header, repair its alignment if the arena returned an unaligned base,
    /// link it onto the physical chain, and return it already marked used.
    /// Spec §4.4.
    fn extend_for(&mut self, s: usize) -> Result<NonNull<RegionHeader>, ArenaError> {
        let n = HEADER_SIZE + align_up(s, ALIGNMENT);
        let base = self.arena.extend_break(n).map_err(|e| {
            log::warn!("arena extension of {n} bytes failed: {e}");
            e
        })?;
        let base_addr = base.as_ptr() as usize;
        let aligned_addr = align_up(base_addr, ALIGNMENT);

        let region_addr = if aligned_addr != base_addr {
            let deficit = aligned_addr - base_addr;
            let repaired = self.arena.extend_break(deficit).map_err(|_| {
                log::warn!(
                    "alignment repair extension of {deficit} bytes failed; \
                     the primary {n}-byte extension is leaked"
                );
                ArenaError::AlignmentRepairFailed
            })?;
            debug_assert_eq!(repaired.as_ptr() as usize, base_addr + n);
            aligned_addr
        } else {
            base_addr
        };

        // SAFETY: `region_addr` is `ALIGNMENT`-aligned, non-null, and names
        // `n` fresh bytes this allocator now exclusively owns.
        let mut region =
            unsafe { NonNull::new_unchecked(region_addr as *mut RegionHeader) };
        unsafe {
            region.as_mut().total_size = n;
            region.as_mut().used_payload = s;
            region.as_mut().prev = None;
            region.as_mut().next = None;
        }

        match self.last_region {
            Some(last) if unsafe { last.as_ref().end() } == region_addr => {
                self.link_after(last, region);
            }
            _ => self.last_region = Some(region),
        }

        self.maybe_split(region, s);
        Ok(region)
    }
}

/// Iterator over [`RegionSnapshot`]s in ascending address order, returned by
/// [`HeapManager::regions`].
pub struct RegionIter<'a, A: BreakArena> {
    manager: &'a HeapManager<A>,
    current: Option<NonNull<RegionHeader>>,
}

impl<'a, A: BreakArena> Iterator for RegionIter<'a, A> {
    type Item = RegionSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let _ = &self.manager;
        let region = self.current?;
        let snapshot = unsafe {
            RegionSnapshot {
                addr: region.as_ref().addr(),
                total_size: region.as_ref().total_size,
                used_payload: region.as_ref().used_payload,
            }
        };
        self.current = unsafe { region.as_ref().next };
        Some(snapshot)
    }
}
