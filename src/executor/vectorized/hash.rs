//! Row hashing over vectors.
//!
//! Hashes are folded column by column into a running buffer seeded with
//! [`HASH_SEED`]; after every key column has been folded, equal rows have
//! equal hashes. The converse does not hold, so callers still compare values.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use super::vector::Vector;

/// Initial value of every row hash before any column is folded in.
pub const HASH_SEED: u64 = 1;

/// Marker folded in for null cells.
const NULL_MARKER: u64 = 0x9e37_79b9_7f4a_7c15;

/// Folds one column into per-row running hashes.
///
/// Implementations must be deterministic functions of the column bytes and
/// null flags, so that the build and probe sides agree.
pub trait KeyHasher: Send + Sync {
    /// Folds rows `start..start + hashes.len()` of `vec` into `hashes`.
    fn rehash(&self, start: usize, hashes: &mut [u64], vec: &Vector);

    /// Folds the rows named by `sels` into `hashes` (one hash per entry).
    fn rehash_selected(&self, sels: &[i64], hashes: &mut [u64], vec: &Vector);
}

/// Default hasher built on `FxHasher`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxKeyHasher;

impl FxKeyHasher {
    #[inline]
    fn fold(prev: u64, vec: &Vector, row: usize) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_u64(prev);
        if vec.is_null(row) {
            hasher.write_u64(NULL_MARKER);
        } else {
            hasher.write(vec.row_bytes(row));
        }
        hasher.finish()
    }
}

impl KeyHasher for FxKeyHasher {
    fn rehash(&self, start: usize, hashes: &mut [u64], vec: &Vector) {
        for (i, h) in hashes.iter_mut().enumerate() {
            *h = Self::fold(*h, vec, start + i);
        }
    }

    fn rehash_selected(&self, sels: &[i64], hashes: &mut [u64], vec: &Vector) {
        for (h, &row) in hashes.iter_mut().zip(sels) {
            *h = Self::fold(*h, vec, row as usize);
        }
    }
}
