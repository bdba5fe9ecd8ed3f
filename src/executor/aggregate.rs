//! Aggregation kernels.
//!
//! An [`Aggregator`] accumulates one column, possibly over many batches, and
//! produces a single value. Null rows are ignored; a kernel that saw no
//! non-null row evaluates to `Value::Null`.

use std::cmp::Ordering;

use crate::error::{ExecError, Result};
use crate::memory::Arena;
use crate::types::{DataType, Value};

use super::vectorized::Vector;

/// Contract shared by aggregation kernels.
pub trait Aggregator: Send {
    /// Forgets every value seen so far.
    fn reset(&mut self);

    /// Type of the aggregated column and of the result.
    fn data_type(&self) -> DataType;

    /// Returns a fresh kernel of the same kind and type.
    fn dup(&self) -> Box<dyn Aggregator>;

    /// Folds rows of `vec` into the state. An empty `sels` means all rows.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if `vec` is not of the kernel's type.
    fn fill(&mut self, sels: &[i64], vec: &Vector) -> Result<()>;

    /// Current result.
    fn eval(&self) -> Value;

    /// Current result as a one-row vector acquired from `arena`.
    ///
    /// # Errors
    ///
    /// Returns an arena error if storage cannot be acquired.
    fn eval_into(&self, arena: &Arena) -> Result<Vector> {
        Vector::from_values(arena, self.data_type(), &[self.eval()])
    }
}

/// `MAX` over a numeric or temporal column.
#[derive(Debug, Clone)]
pub struct Max {
    data_type: DataType,
    current: Option<Value>,
    /// Non-null rows seen.
    count: u64,
}

impl Max {
    /// Creates a `MAX` kernel for `data_type`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for booleans and strings.
    pub fn new(data_type: DataType) -> Result<Self> {
        match data_type {
            DataType::Int64
            | DataType::Float32
            | DataType::Float64
            | DataType::Date
            | DataType::Timestamp => Ok(Self {
                data_type,
                current: None,
                count: 0,
            }),
            DataType::Bool | DataType::String => Err(ExecError::UnsupportedOperation(format!(
                "MAX over {data_type}"
            ))),
        }
    }

    /// Number of non-null rows folded in.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    fn offer(&mut self, value: Value) {
        self.count += 1;
        let replace = match &self.current {
            None => true,
            Some(current) => value.compare(current) == Some(Ordering::Greater),
        };
        if replace {
            self.current = Some(value);
        }
    }
}

impl Aggregator for Max {
    fn reset(&mut self) {
        self.current = None;
        self.count = 0;
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn dup(&self) -> Box<dyn Aggregator> {
        Box::new(Self {
            data_type: self.data_type,
            current: None,
            count: 0,
        })
    }

    fn fill(&mut self, sels: &[i64], vec: &Vector) -> Result<()> {
        if vec.data_type() != self.data_type {
            return Err(ExecError::TypeError {
                expected: self.data_type.name().to_string(),
                actual: vec.data_type().name().to_string(),
            });
        }
        if sels.is_empty() {
            for row in 0..vec.length() {
                if !vec.is_null(row) {
                    self.offer(vec.value(row));
                }
            }
        } else {
            for &row in sels {
                let row = row as usize;
                if !vec.is_null(row) {
                    self.offer(vec.value(row));
                }
            }
        }
        Ok(())
    }

    fn eval(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_across_fills() {
        let arena = Arena::new();
        let a = Vector::from_i64s(&arena, &[3, 9, 1]).unwrap();
        let b = Vector::from_values(
            &arena,
            DataType::Int64,
            &[Value::Null, Value::Int64(12), Value::Int64(40)],
        )
        .unwrap();

        let mut max = Max::new(DataType::Int64).unwrap();
        max.fill(&[], &a).unwrap();
        assert_eq!(max.eval(), Value::Int64(9));
        // Row 2 is not selected.
        max.fill(&[0, 1], &b).unwrap();
        assert_eq!(max.eval(), Value::Int64(12));
        assert_eq!(max.count(), 4);

        a.release(&arena);
        b.release(&arena);
    }

    #[test]
    fn test_all_null_is_null() {
        let arena = Arena::new();
        let v =
            Vector::from_values(&arena, DataType::Float32, &[Value::Null, Value::Null]).unwrap();
        let mut max = Max::new(DataType::Float32).unwrap();
        max.fill(&[], &v).unwrap();
        assert_eq!(max.eval(), Value::Null);

        let out = max.eval_into(&arena).unwrap();
        assert_eq!(out.length(), 1);
        assert!(out.is_null(0));
        out.release(&arena);
        v.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_reset_and_dup() {
        let arena = Arena::new();
        let v = Vector::from_values(
            &arena,
            DataType::Float64,
            &[Value::Float64(-1.5), Value::Float64(2.25)],
        )
        .unwrap();
        let mut max = Max::new(DataType::Float64).unwrap();
        max.fill(&[], &v).unwrap();

        let out = max.eval_into(&arena).unwrap();
        assert_eq!(out.value(0), Value::Float64(2.25));
        out.release(&arena);

        let fresh = max.dup();
        assert_eq!(fresh.eval(), Value::Null);
        assert_eq!(fresh.data_type(), DataType::Float64);
        max.reset();
        assert_eq!(max.eval(), Value::Null);
        v.release(&arena);
    }

    #[test]
    fn test_rejects_bool_and_mismatch() {
        assert!(Max::new(DataType::Bool).is_err());
        let arena = Arena::new();
        let v = Vector::from_strs(&arena, &["a"]).unwrap();
        let mut max = Max::new(DataType::Int64).unwrap();
        assert!(matches!(max.fill(&[], &v), Err(ExecError::TypeError { .. })));
        v.release(&arena);
    }
}
