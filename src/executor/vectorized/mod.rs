//! Vectorized execution module.
//!
//! This module provides the columnar data model shared by batch operators:
//! arena-backed vectors, selection vectors, batches and row hashing.

pub mod batch;
pub mod hash;
pub mod selection;
pub mod vector;

pub use batch::Batch;
pub use hash::{FxKeyHasher, KeyHasher, HASH_SEED};
pub use selection::{SelectionBuilder, SelectionVector};
pub use vector::Vector;
