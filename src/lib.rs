//! colexec - vectorized batch execution core
//!
//! Columnar batches backed by a shared [`memory::Arena`], hashed in bounded
//! units and folded into cross-batch groups. The [`executor::Difference`]
//! operator computes `R - S` over two batch streams on top of these pieces.
//!
//! # Example
//!
//! ```ignore
//! let ctx = ExecutionContext::new(ExecutorConfig::default())?;
//! let (r_tx, r_rx) = channel("R", 4);
//! let (s_tx, s_rx) = channel("S", 4);
//! let mut op = Difference::new(&ctx, r_rx, s_rx);
//! // producers send batches and `Message::End` on r_tx / s_tx ...
//! while let Some(batch) = op.next()? {
//!     println!("{:?}", batch.rows());
//!     batch.release(ctx.arena());
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod memory;
pub mod types;

pub use config::ExecutorConfig;
pub use error::{ExecError, Result};
pub use executor::{
    channel, Batch, BatchOperator, Difference, ExecutionContext, Message, SelectionVector, Vector,
};
pub use memory::{Arena, ArenaStats};
pub use types::{DataType, Value};
