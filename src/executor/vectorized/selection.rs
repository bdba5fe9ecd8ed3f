//! Arena-backed selection vectors.

use crate::error::Result;
use crate::memory::{grow_capacity, Arena, Buffer};

/// Ordered list of row indices over a batch.
///
/// Instead of materializing filtered results immediately, operators keep
/// track of which rows are selected. The indices live in an arena buffer
/// that is released together with the owning batch.
#[derive(Debug)]
pub struct SelectionVector {
    buf: Buffer,
    len: usize,
}

impl SelectionVector {
    /// Creates a selection vector holding `indices`.
    ///
    /// # Errors
    ///
    /// Returns an arena error if storage cannot be acquired.
    pub fn from_indices(arena: &Arena, indices: &[i64]) -> Result<Self> {
        let mut buf = arena.acquire(indices.len() * 8)?;
        for (pos, &idx) in indices.iter().enumerate() {
            buf.set_i64(pos, idx);
        }
        Ok(Self {
            buf,
            len: indices.len(),
        })
    }

    /// Returns the number of selected rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no rows are selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the index at the given position.
    #[must_use]
    pub fn get(&self, pos: usize) -> Option<i64> {
        (pos < self.len).then(|| self.buf.i64_at(pos))
    }

    /// Iterates the selected row indices in order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len).map(|pos| self.buf.i64_at(pos))
    }

    /// Copies the indices out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<i64> {
        self.iter().collect()
    }

    /// Number of indices the backing buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.i64_capacity()
    }

    /// Returns the backing buffer to the arena.
    pub fn release(self, arena: &Arena) {
        arena.release(self.buf);
    }
}

/// Growable accumulator for an output selection vector.
///
/// Capacity starts at 8 indices, doubles below 1024 and then grows by 25%.
/// Each growth acquires a new buffer, copies the live indices and releases
/// the old one.
#[derive(Debug, Default)]
pub struct SelectionBuilder {
    buf: Option<Buffer>,
    len: usize,
}

impl SelectionBuilder {
    /// Creates an empty builder. Nothing is acquired until the first push.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row index, growing the buffer if it is full.
    ///
    /// # Errors
    ///
    /// Returns an arena error if growth fails. The indices gathered so far
    /// are kept and must still be released.
    pub fn push(&mut self, arena: &Arena, idx: i64) -> Result<()> {
        if self.len == self.capacity() {
            self.grow(arena)?;
        }
        if let Some(buf) = self.buf.as_mut() {
            buf.set_i64(self.len, idx);
            self.len += 1;
        }
        Ok(())
    }

    fn grow(&mut self, arena: &Arena) -> Result<()> {
        let capacity = grow_capacity(self.capacity());
        let mut next = arena.acquire(capacity * 8)?;
        if let Some(old) = self.buf.take() {
            next.as_mut_slice()[..self.len * 8].copy_from_slice(&old.as_slice()[..self.len * 8]);
            arena.release(old);
        }
        self.buf = Some(next);
        Ok(())
    }

    /// Returns the number of indices appended.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing was appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the current capacity in indices.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, Buffer::i64_capacity)
    }

    /// Finishes the builder; `None` if no index was appended.
    #[must_use]
    pub fn finish(self) -> Option<SelectionVector> {
        let len = self.len;
        self.buf.map(|buf| SelectionVector { buf, len })
    }

    /// Abandons the builder, returning its buffer to the arena.
    pub fn release(self, arena: &Arena) {
        if let Some(buf) = self.buf {
            arena.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_vector() {
        let arena = Arena::new();
        let selection = SelectionVector::from_indices(&arena, &[0, 2, 4]).unwrap();
        assert_eq!(selection.len(), 3);
        assert_eq!(selection.get(0), Some(0));
        assert_eq!(selection.get(1), Some(2));
        assert_eq!(selection.get(2), Some(4));
        assert_eq!(selection.get(3), None);
        selection.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_builder_growth_preserves_order() {
        let arena = Arena::new();
        let mut builder = SelectionBuilder::new();
        assert_eq!(builder.capacity(), 0);

        for i in 0..9 {
            builder.push(&arena, i * 3).unwrap();
        }
        assert_eq!(builder.capacity(), 16);

        for i in 9..1500 {
            builder.push(&arena, i * 3).unwrap();
        }
        // 8 -> 16 -> ... -> 1024 -> 1280 -> 1600
        assert_eq!(builder.capacity(), 1600);
        // Only the live buffer is outstanding.
        assert_eq!(arena.stats().outstanding(), 1);

        let selection = builder.finish().unwrap();
        let expected: Vec<i64> = (0..1500).map(|i| i * 3).collect();
        assert_eq!(selection.to_vec(), expected);
        selection.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_empty_builder_finishes_to_none() {
        let builder = SelectionBuilder::new();
        assert!(builder.finish().is_none());
    }

    #[test]
    fn test_builder_growth_failure_keeps_contents() {
        // 8 indices fit in 64 bytes; growing to 16 needs another 128.
        let arena = Arena::with_limit(64 + 64);
        let mut builder = SelectionBuilder::new();
        for i in 0..8 {
            builder.push(&arena, i).unwrap();
        }
        assert!(builder.push(&arena, 8).is_err());
        assert_eq!(builder.len(), 8);
        builder.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }
}
