//! Size-bucketed, doubly-linked free lists.
//!
//! One list per size class (see [`crate::region::class_of`]); insertion is
//! LIFO (push at head) to favor temporal locality of recently freed regions.
//! All operations are O(1).

use crate::region::{class_of, RegionHeader, NUM_CLASSES};
use core::ptr::NonNull;

pub(crate) struct FreeLists {
    heads: [Option<NonNull<RegionHeader>>; NUM_CLASSES],
}

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [None; NUM_CLASSES],
        }
    }

    /// Link `region` at the head of its size class.
    ///
    /// # Safety
    /// `region` must be free, not already linked in any free list, and its
    /// `max_payload` must reflect its final (post-split/coalesce) size.
    pub(crate) unsafe fn insert(&mut self, region: NonNull<RegionHeader>) {
        let class = class_of(unsafe { region.as_ref().max_payload() });
        let mut link = unsafe { region.as_ref().free_link() };
        let old_head = self.heads[class];

        unsafe {
            link.as_mut().prev_free = None;
            link.as_mut().next_free = old_head;
        }
        if let Some(mut head) = old_head {
            unsafe { head.as_mut().free_link().as_mut().prev_free = Some(region) };
        }
        self.heads[class] = Some(region);
    }

    /// Unlink `region` from whichever size class it currently occupies.
    ///
    /// # Safety
    /// `region` must currently be linked in the free list matching its
    /// current `max_payload`.
    pub(crate) unsafe fn remove(&mut self, region: NonNull<RegionHeader>) {
        let class = class_of(unsafe { region.as_ref().max_payload() });
        let link = unsafe { region.as_ref().free_link() };
        let (prev, next) = unsafe { (link.as_ref().prev_free, link.as_ref().next_free) };

        match prev {
            Some(mut p) => unsafe { p.as_mut().free_link().as_mut().next_free = next },
            None => self.heads[class] = next,
        }
        if let Some(mut n) = next {
            unsafe { n.as_mut().free_link().as_mut().prev_free = prev };
        }
    }

    /// Walk up to `tries` nodes of `class`, returning the first with
    /// `max_payload >= min_payload`.
    pub(crate) fn probe(
        &self,
        class: usize,
        min_payload: usize,
        tries: usize,
    ) -> Option<NonNull<RegionHeader>> {
        let mut current = self.heads[class];
        for _ in 0..tries {
            let node = current?;
            if unsafe { node.as_ref().max_payload() } >= min_payload {
                return Some(node);
            }
            current = unsafe { node.as_ref().free_link().as_ref().next_free };
        }
        None
    }

    /// First non-empty class at or above `start`, with its head region.
    pub(crate) fn first_fit_from(&self, start: usize) -> Option<NonNull<RegionHeader>> {
        self.heads[start..].iter().find_map(|head| *head)
    }
}
