//! Executor module for batch execution.
//!
//! Operators pull [`Batch`]es from their inputs and hand transformed batches
//! to their consumer. Inputs arrive over bounded [`stream`]s; state that
//! outlives a single batch (groups, slot maps, arena buffers) is owned by
//! the operator and given back on every exit path.

pub mod aggregate;
mod context;
pub mod difference;
pub mod group;
pub mod slot_map;
pub mod stream;
pub mod vectorized;

use crate::error::Result;

pub use aggregate::{Aggregator, Max};
pub use context::ExecutionContext;
pub use difference::{Difference, DifferenceStats, Phase};
pub use group::{GroupTracker, RowLocation, MATCHED};
pub use slot_map::{HashSlotMap, SlotMapPool};
pub use stream::{channel, BatchReceiver, BatchSender, Message};
pub use vectorized::{Batch, SelectionVector, Vector};

/// Pull-based batch operator.
pub trait BatchOperator {
    /// Returns the next output batch, or `None` once the output is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if execution fails. The operator has released its
    /// state by then and keeps returning `None`.
    fn next(&mut self) -> Result<Option<Batch>>;
}
