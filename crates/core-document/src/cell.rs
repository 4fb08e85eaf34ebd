//! Stable numeric cells backing the document cache.
//!
//! A `NumCell` is the "stable double pointer" of the store: once a key has
//! been read or written through the cache, its cell address never changes for
//! the lifetime of the owning document. Compiled expressions keep `CellRef`
//! clones and read through them on the hot path without touching the JSON
//! tree. Writes through a cell are lazy — the cache notices the changed bits
//! on the next read and re-synchronises the semantic value (see
//! `document::CacheEntry`).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A shareable, address-stable `f64` slot.
///
/// Stored as raw bits in an `AtomicU64` so that worker threads may read and
/// write concurrently without locking the owning document. All accesses are
/// relaxed: cross-thread ordering is established by the frame barrier, not by
/// individual cell operations.
#[derive(Debug)]
pub struct NumCell(AtomicU64);

/// Reference-counted handle to a [`NumCell`]. Two handles compare equal as
/// pointers iff they denote the same storage cell.
pub type CellRef = Arc<NumCell>;

impl NumCell {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Atomic read-modify-write used by the threadsafe increment family.
    pub fn update(&self, f: impl Fn(f64) -> f64) -> f64 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let next = f(f64::from_bits(cur)).to_bits();
            match self
                .0
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return f64::from_bits(next),
                Err(observed) => cur = observed,
            }
        }
    }
}

impl Default for NumCell {
    fn default() -> Self {
        Self::new(0.0)
    }
}
