//! Static arenas
//!
//! Each entry point owns one fixed byte buffer for the life of the process.
//! A call takes the buffer through [`ArenaCell::try_lock`]; while the guard
//! lives, a reentrant or concurrent call gets `None` instead of an alias.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Arena for plain runs
pub const RUN_ARENA_SIZE: usize = 40_000;

/// Arena for profiling runs
pub const PROFILE_ARENA_SIZE: usize = 20_000;

/// A byte buffer with a busy flag
pub struct ArenaCell<const N: usize> {
    busy: AtomicBool,
    bytes: UnsafeCell<[u8; N]>,
}

// Access to `bytes` only happens through an `ArenaGuard`, and at most one
// guard exists at a time
unsafe impl<const N: usize> Sync for ArenaCell<N> {}

impl<const N: usize> ArenaCell<N> {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            bytes: UnsafeCell::new([0; N]),
        }
    }

    /// Take exclusive use of the buffer, or `None` if it is in use
    pub fn try_lock(&self) -> Option<ArenaGuard<'_, N>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            warn!("Arena of {} bytes is already in use", N);
            return None;
        }
        Some(ArenaGuard { cell: self })
    }

    /// Whether a guard is currently live
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for ArenaCell<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to an [`ArenaCell`]'s bytes
pub struct ArenaGuard<'c, const N: usize> {
    cell: &'c ArenaCell<N>,
}

impl<const N: usize> Deref for ArenaGuard<'_, N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { &*self.cell.bytes.get() }
    }
}

impl<const N: usize> DerefMut for ArenaGuard<'_, N> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { &mut *self.cell.bytes.get() }
    }
}

impl<const N: usize> Drop for ArenaGuard<'_, N> {
    fn drop(&mut self) {
        self.cell.busy.store(false, Ordering::Release);
    }
}

pub static RUN_ARENA: ArenaCell<RUN_ARENA_SIZE> = ArenaCell::new();
pub static PROFILE_ARENA: ArenaCell<PROFILE_ARENA_SIZE> = ArenaCell::new();
