//! Hosted backend for the [`heap`] allocator: an `sbrk`-backed
//! [`heap::BreakArena`] plus the C ABI surface (`malloc`/`free`/`calloc`/
//! `realloc`) a linked program expects to find.
#![no_std]

use core::ptr::NonNull;
use heap::{ArenaError, BreakArena, HeapManager};

/// Extends the process break via `sbrk(2)`.
///
/// A zero-sized unit type: there is exactly one process break, so there is
/// nothing to store per instance.
pub struct SbrkArena;

impl BreakArena for SbrkArena {
    fn extend_break(&mut self, n: usize) -> Result<NonNull<u8>, ArenaError> {
        // SAFETY: `sbrk` is safe to call as long as nothing else in the
        // process also moves the break concurrently, which is this crate's
        // single-threaded contract (enforced here by `Locked`'s mutex).
        let base = unsafe { libc::sbrk(n as libc::intptr_t) };
        if base == usize::MAX as *mut libc::c_void {
            return Err(ArenaError::BreakExhausted);
        }
        // SAFETY: `sbrk` only returns null on platforms this allocator does
        // not target; a non-failure return is always a valid process address.
        Ok(unsafe { NonNull::new_unchecked(base as *mut u8) })
    }
}

/// Wraps a value in a [`spin::Mutex`] purely to make it `Sync`, so it can
/// live in a `static`. The mutex is never meaningfully contended: this
/// allocator's contract is single-threaded, so every lock acquisition
/// either succeeds immediately or indicates reentrant misuse.
pub struct Locked<A> {
    inner: spin::Mutex<A>,
}

impl<A> Locked<A> {
    pub const fn new(inner: A) -> Self {
        Locked {
            inner: spin::Mutex::new(inner),
        }
    }

    pub fn lock(&self) -> spin::MutexGuard<A> {
        self.inner.lock()
    }
}

static ALLOCATOR: Locked<HeapManager<SbrkArena>> = Locked::new(HeapManager::new(SbrkArena));

/// # Safety
/// `size` is the only input; `malloc` returns null on failure per the C
/// convention rather than panicking.
#[unsafe(no_mangle)]
pub extern "C" fn malloc(size: usize) -> *mut u8 {
    let mut manager = ALLOCATOR.lock();
    match manager.allocate(size) {
        Some(p) => {
            log::trace!("malloc({size}) -> {:p}", p.as_ptr());
            p.as_ptr()
        }
        None => {
            log::warn!("malloc({size}) failed");
            core::ptr::null_mut()
        }
    }
}

/// # Safety
/// `ptr` must be either null or a pointer previously returned by `malloc`,
/// `calloc`, or `realloc` from this allocator, not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut u8) {
    let Some(p) = NonNull::new(ptr) else { return };
    log::trace!("free({:p})", p.as_ptr());
    ALLOCATOR.lock().free(Some(p));
}

/// # Safety
/// Same contract as `malloc`. `nmemb` is accepted for ABI compatibility but,
/// matching this allocator's documented policy, only `size` bytes are
/// actually allocated and zeroed.
#[unsafe(no_mangle)]
pub extern "C" fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    let mut manager = ALLOCATOR.lock();
    match manager.zero_allocate(nmemb, size) {
        Some(p) => {
            log::trace!("calloc({nmemb}, {size}) -> {:p}", p.as_ptr());
            p.as_ptr()
        }
        None => {
            log::warn!("calloc({nmemb}, {size}) failed");
            core::ptr::null_mut()
        }
    }
}

/// # Safety
/// `ptr` must be either null or a pointer previously returned by this
/// allocator, not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    let mut manager = ALLOCATOR.lock();
    match manager.reallocate(NonNull::new(ptr), size) {
        Some(p) => {
            log::trace!("realloc({ptr:p}, {size}) -> {:p}", p.as_ptr());
            p.as_ptr()
        }
        None => {
            if size > 0 {
                log::warn!("realloc({ptr:p}, {size}) failed");
            }
            core::ptr::null_mut()
        }
    }
}
