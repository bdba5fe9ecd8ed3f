//! Arena memory pool for execution buffers.
//!
//! Every vector, selection vector and aggregation result is carved out of an
//! [`Arena`]. The arena provides:
//! - Zeroed buffers rounded up to power-of-two size classes
//! - A free list per size class, each behind its own lock
//! - An optional byte limit; exceeding it fails the allocation
//! - Acquire/release counters so leaks can be checked after a run
//!
//! # Example
//!
//! ```ignore
//! let arena = Arena::with_limit(64 * 1024 * 1024);
//! let buf = arena.acquire(1024)?;
//! // ... fill the buffer ...
//! arena.release(buf);
//! assert_eq!(arena.stats().outstanding(), 0);
//! ```

mod buffer;

pub use buffer::Buffer;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{ExecError, Result};

/// Smallest size class, as a power of two (64 bytes).
const MIN_CLASS_SHIFT: u32 = 6;

/// Number of pooled size classes (64 B up to 64 MB).
const NUM_CLASSES: usize = 21;

/// Idle buffers kept per size class before extra releases are freed.
const DEFAULT_MAX_IDLE_PER_CLASS: usize = 64;

/// Initial element capacity of a growable selection buffer.
pub const MIN_GROWTH_CAPACITY: usize = 8;

/// Capacity below which growable buffers double; above it they grow by 25%.
pub const GROWTH_DOUBLING_LIMIT: usize = 1024;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the next element capacity for a growable buffer.
///
/// Starts at [`MIN_GROWTH_CAPACITY`], doubles while below
/// [`GROWTH_DOUBLING_LIMIT`] and grows by a quarter afterwards.
#[must_use]
pub fn grow_capacity(current: usize) -> usize {
    if current == 0 {
        MIN_GROWTH_CAPACITY
    } else if current < GROWTH_DOUBLING_LIMIT {
        current * 2
    } else {
        current + current / 4
    }
}

/// Maps a byte size to its size class, or `None` if it is too large to pool.
fn size_class(size: usize) -> Option<usize> {
    let rounded = size.max(1 << MIN_CLASS_SHIFT).checked_next_power_of_two()?;
    let class = (rounded.trailing_zeros() - MIN_CLASS_SHIFT) as usize;
    (class < NUM_CLASSES).then_some(class)
}

fn class_capacity(class: usize) -> usize {
    1 << (class as u32 + MIN_CLASS_SHIFT)
}

/// Shared pool of zeroed byte buffers.
pub struct Arena {
    /// Identifier stamped on every buffer this arena hands out.
    id: u64,
    /// Free lists, one per size class.
    classes: Vec<Mutex<Vec<Box<[u8]>>>>,
    /// Maximum bytes in use (0 = unlimited).
    limit: usize,
    /// Idle buffers retained per class.
    max_idle_per_class: usize,
    /// Bytes currently handed out (by capacity).
    in_use: AtomicUsize,
    /// High-water mark of `in_use`.
    peak: AtomicUsize,
    /// Number of successful acquisitions.
    acquires: AtomicU64,
    /// Number of releases.
    releases: AtomicU64,
}

impl Arena {
    /// Creates an arena without a byte limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Creates an arena that refuses to hand out more than `limit` bytes.
    ///
    /// A limit of 0 means unlimited.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            classes: (0..NUM_CLASSES).map(|_| Mutex::new(Vec::new())).collect(),
            limit,
            max_idle_per_class: DEFAULT_MAX_IDLE_PER_CLASS,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Returns the configured byte limit (0 = unlimited).
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Acquires a zeroed buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `MemoryLimitExceeded` if the allocation would push the arena
    /// over its limit. The caller has no smaller fallback, so this is not
    /// retried.
    pub fn acquire(&self, size: usize) -> Result<Buffer> {
        let class = size_class(size);
        let capacity = class.map_or(size, class_capacity);
        self.reserve(capacity)?;

        let data = match class {
            Some(class) => {
                let recycled = self.classes[class].lock().pop();
                match recycled {
                    Some(mut data) => {
                        data[..size].fill(0);
                        data
                    }
                    None => vec![0u8; capacity].into_boxed_slice(),
                }
            }
            None => vec![0u8; capacity].into_boxed_slice(),
        };

        self.acquires.fetch_add(1, Ordering::Relaxed);
        Ok(Buffer {
            data,
            len: size,
            class,
            arena_id: self.id,
        })
    }

    /// Returns a buffer to the pool.
    ///
    /// Buffers from another arena are dropped and not counted.
    pub fn release(&self, buffer: Buffer) {
        if buffer.arena_id != self.id {
            tracing::warn!(
                buffer_arena = buffer.arena_id,
                arena = self.id,
                "buffer released to an arena that did not acquire it"
            );
            return;
        }

        let capacity = buffer.capacity();
        self.in_use.fetch_sub(capacity, Ordering::AcqRel);
        self.releases.fetch_add(1, Ordering::Relaxed);

        if let Some(class) = buffer.class {
            let mut free = self.classes[class].lock();
            if free.len() < self.max_idle_per_class {
                free.push(buffer.data);
            }
        }
    }

    /// Reserves `bytes` against the limit.
    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if self.limit > 0 && next > self.limit {
                return Err(ExecError::MemoryLimitExceeded {
                    used: next,
                    limit: self.limit,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops every idle buffer held in the free lists.
    pub fn shrink(&self) {
        for class in &self.classes {
            class.lock().clear();
        }
    }

    /// Returns arena statistics.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let idle_buffers = self.classes.iter().map(|c| c.lock().len()).sum();
        ArenaStats {
            limit: self.limit,
            bytes_in_use: self.in_use.load(Ordering::Acquire),
            peak_bytes: self.peak.load(Ordering::Relaxed),
            acquires: self.acquires.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            idle_buffers,
        }
    }

    /// Resets the peak counter to the current usage.
    pub fn reset_peak(&self) {
        self.peak
            .store(self.in_use.load(Ordering::Acquire), Ordering::Relaxed);
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Statistics about arena usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Byte limit (0 = unlimited).
    pub limit: usize,
    /// Bytes currently handed out.
    pub bytes_in_use: usize,
    /// Highest `bytes_in_use` observed.
    pub peak_bytes: usize,
    /// Number of acquisitions.
    pub acquires: u64,
    /// Number of releases.
    pub releases: u64,
    /// Buffers sitting in free lists.
    pub idle_buffers: usize,
}

impl ArenaStats {
    /// Buffers acquired but not yet released.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.acquires.saturating_sub(self.releases)
    }
}
