//! Arena-backed byte buffer.

/// A zeroed byte buffer handed out by an [`Arena`](super::Arena).
///
/// The buffer remembers the size that was requested (`len`) separately from
/// the capacity of the size class it was carved from. Only the first `len`
/// bytes are visible. A buffer must be given back with
/// [`Arena::release`](super::Arena::release) exactly once.
#[derive(Debug)]
#[must_use = "arena buffers must be released back to their arena"]
pub struct Buffer {
    /// Backing storage; its length is the size-class capacity.
    pub(super) data: Box<[u8]>,
    /// Requested size in bytes.
    pub(super) len: usize,
    /// Size class index, `None` for oversized buffers.
    pub(super) class: Option<usize>,
    /// Identifier of the arena that produced this buffer.
    pub(super) arena_id: u64,
}

impl Buffer {
    /// Returns the requested length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the capacity of the underlying allocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the visible bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Returns the visible bytes mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Reads the `idx`-th little-endian `i64`.
    #[must_use]
    pub fn i64_at(&self, idx: usize) -> i64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.as_slice()[idx * 8..idx * 8 + 8]);
        i64::from_le_bytes(raw)
    }

    /// Writes the `idx`-th little-endian `i64`.
    pub fn set_i64(&mut self, idx: usize, value: i64) {
        self.as_mut_slice()[idx * 8..idx * 8 + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Number of whole `i64` slots in the visible region.
    #[must_use]
    pub fn i64_capacity(&self) -> usize {
        self.len / 8
    }
}
