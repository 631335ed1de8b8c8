//! Downward interface to the monotonic, single-threaded system-memory
//! primitive this heap manager is built on top of.
//!
//! `heap` itself never extends the process break directly — it is generic
//! over [`BreakArena`] so it can be driven by a hosted `sbrk`-backed
//! implementation (see the `heap-sys` crate) or, in tests, a fake in-memory
//! arena that never touches the real process break.

use core::ptr::NonNull;

/// Failure modes of [`BreakArena::extend_break`] as seen by the heap manager.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArenaError {
    /// The arena's break pointer could not be extended at all.
    #[error("break pointer extension failed")]
    BreakExhausted,
    /// The first extension succeeded, but a second extension requested to
    /// absorb alignment padding (see §4.4) failed. The first extension is
    /// leaked; this is accepted under the single-threaded contract rather
    /// than unwound.
    #[error("alignment repair extension failed after the primary extension succeeded")]
    AlignmentRepairFailed,
}

/// The single operation this heap manager requires from its environment.
pub trait BreakArena {
    /// Extend the break by exactly `n` bytes, returning the base address of
    /// the new span.
    ///
    /// # Contract
    /// - Must extend by *exactly* `n` bytes; a consecutive pair of calls
    ///   `extend_break(a)` then `extend_break(b)` must yield spans
    ///   `[base, base+a)` and `[base+a, base+a+b)`.
    /// - Must be observed single-threaded: no concurrent extension from any
    ///   other caller.
    /// - `n` is always greater than zero.
    fn extend_break(&mut self, n: usize) -> Result<NonNull<u8>, ArenaError>;
}
