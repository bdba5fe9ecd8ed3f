//! Columnar batch with optional selection vector.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{ExecError, Result};
use crate::memory::Arena;
use crate::types::{DataType, Value};

use super::selection::SelectionVector;
use super::vector::Vector;

/// Named collection of equal-length vectors plus an optional selection.
///
/// A batch without attributes carries no data; operators skip it.
#[derive(Debug, Default)]
pub struct Batch {
    /// Column names.
    attrs: Vec<String>,
    /// One vector per attribute.
    vecs: Vec<Vector>,
    /// Selected rows; `None` (or empty) selects every row.
    selection: Option<SelectionVector>,
}

impl Batch {
    /// Creates a batch, checking that names and vectors line up.
    ///
    /// On failure the vectors are released back to `arena`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if the attribute count differs from the vector
    /// count or the vectors disagree on length.
    pub fn try_new(arena: &Arena, attrs: Vec<String>, vecs: Vec<Vector>) -> Result<Self> {
        let problem = if attrs.len() == vecs.len() {
            vecs.iter()
                .skip(1)
                .find(|v| v.length() != vecs[0].length())
                .map(|v| {
                    format!(
                        "vector lengths differ: {} vs {}",
                        vecs[0].length(),
                        v.length()
                    )
                })
        } else {
            Some(format!(
                "{} attributes for {} vectors",
                attrs.len(),
                vecs.len()
            ))
        };

        if let Some(message) = problem {
            for vec in vecs {
                vec.release(arena);
            }
            return Err(ExecError::InvalidBatch(message));
        }

        Ok(Self {
            attrs,
            vecs,
            selection: None,
        })
    }

    /// Creates a batch with no attributes, meaning "no data, keep going".
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if this batch carries no attributes.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Returns the column names.
    #[must_use]
    pub fn attrs(&self) -> &[String] {
        &self.attrs
    }

    /// Returns the vectors.
    #[must_use]
    pub fn vectors(&self) -> &[Vector] {
        &self.vecs
    }

    /// Returns the column types in order.
    #[must_use]
    pub fn data_types(&self) -> Vec<DataType> {
        self.vecs.iter().map(Vector::data_type).collect()
    }

    /// Returns a column by index.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Vector> {
        self.vecs.get(index)
    }

    /// Returns a column by name.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&Vector> {
        self.attrs
            .iter()
            .position(|a| a == name)
            .map(|i| &self.vecs[i])
    }

    /// Returns the number of physical rows, ignoring the selection.
    #[must_use]
    pub fn length(&self) -> usize {
        self.vecs.first().map_or(0, Vector::length)
    }

    /// Returns the number of columns in this batch.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.vecs.len()
    }

    /// Returns the number of rows in this batch.
    ///
    /// If there's a selection vector, returns the number of selected rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.selection().map_or_else(|| self.length(), SelectionVector::len)
    }

    /// Returns the selection vector, if any non-empty one is attached.
    #[must_use]
    pub fn selection(&self) -> Option<&SelectionVector> {
        self.selection.as_ref().filter(|s| !s.is_empty())
    }

    /// Replaces the selection, releasing the previous one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if an index is outside `[0, length)`; the new
    /// selection is released in that case and the old one kept.
    pub fn set_selection(&mut self, arena: &Arena, selection: SelectionVector) -> Result<()> {
        let len = self.length() as i64;
        let bad = selection.iter().find(|&i| i < 0 || i >= len);
        if let Some(bad) = bad {
            selection.release(arena);
            return Err(ExecError::InvalidBatch(format!(
                "selection index {bad} out of range for {len} rows"
            )));
        }
        if let Some(old) = self.selection.replace(selection) {
            old.release(arena);
        }
        Ok(())
    }

    /// Returns the selected row indices in order.
    #[must_use]
    pub fn selected_rows(&self) -> Vec<i64> {
        match self.selection() {
            Some(selection) => selection.to_vec(),
            None => (0..self.length() as i64).collect(),
        }
    }

    /// Decodes the selected rows into runtime values.
    #[must_use]
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.selected_rows()
            .into_iter()
            .map(|row| self.vecs.iter().map(|v| v.value(row as usize)).collect())
            .collect()
    }

    /// Returns vectors and the selection buffer to the arena.
    pub fn release(self, arena: &Arena) {
        for vec in self.vecs {
            vec.release(arena);
        }
        if let Some(selection) = self.selection {
            selection.release(arena);
        }
    }

    /// Imports an Arrow record batch into arena-backed vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if a column type is unsupported or storage cannot be
    /// acquired; vectors created so far are released.
    pub fn from_record_batch(arena: &Arena, batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let mut vecs = Vec::with_capacity(batch.num_columns());
        for column in batch.columns() {
            match Vector::from_arrow(arena, column.as_ref()) {
                Ok(vec) => vecs.push(vec),
                Err(e) => {
                    for vec in vecs {
                        vec.release(arena);
                    }
                    return Err(e);
                }
            }
        }
        let attrs = schema.fields().iter().map(|f| f.name().clone()).collect();
        Self::try_new(arena, attrs, vecs)
    }

    /// Materializes the selected rows as an Arrow record batch.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if the take kernel fails.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .attrs
            .iter()
            .zip(&self.vecs)
            .map(|(name, vec)| Field::new(name, vec.data_type().to_arrow(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let columns: Vec<ArrayRef> = self.vecs.iter().map(Vector::to_arrow).collect();
        let columns = match self.selection() {
            Some(selection) => {
                let indices =
                    UInt32Array::from(selection.iter().map(|i| i as u32).collect::<Vec<_>>());
                columns
                    .iter()
                    .map(|col| arrow::compute::take(col.as_ref(), &indices, None))
                    .collect::<arrow::error::Result<Vec<_>>>()?
            }
            None => columns,
        };
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::DataType as ArrowDataType;

    fn test_batch(arena: &Arena) -> Batch {
        let a = Vector::from_i64s(arena, &[1, 2, 3, 4, 5]).unwrap();
        let b = Vector::from_strs(arena, &["a", "b", "c", "d", "e"]).unwrap();
        Batch::try_new(arena, vec!["a".into(), "b".into()], vec![a, b]).unwrap()
    }

    #[test]
    fn test_batch_basic() {
        let arena = Arena::new();
        let batch = test_batch(&arena);
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.num_columns(), 2);
        assert!(batch.selection().is_none());
        assert!(batch.column_by_name("b").is_some());
        assert!(batch.column_by_name("z").is_none());
        batch.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_length_mismatch_releases_vectors() {
        let arena = Arena::new();
        let a = Vector::from_i64s(&arena, &[1, 2]).unwrap();
        let b = Vector::from_i64s(&arena, &[1]).unwrap();
        let err = Batch::try_new(&arena, vec!["a".into(), "b".into()], vec![a, b]).unwrap_err();
        assert!(matches!(err, ExecError::InvalidBatch(_)));
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_set_selection_replaces_previous() {
        let arena = Arena::new();
        let mut batch = test_batch(&arena);
        let first = SelectionVector::from_indices(&arena, &[0, 1]).unwrap();
        batch.set_selection(&arena, first).unwrap();
        let second = SelectionVector::from_indices(&arena, &[4, 2]).unwrap();
        batch.set_selection(&arena, second).unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.selected_rows(), vec![4, 2]);
        assert_eq!(
            batch.rows(),
            vec![
                vec![Value::Int64(5), Value::String("e".into())],
                vec![Value::Int64(3), Value::String("c".into())],
            ]
        );

        let bad = SelectionVector::from_indices(&arena, &[5]).unwrap();
        assert!(batch.set_selection(&arena, bad).is_err());
        assert_eq!(batch.selected_rows(), vec![4, 2]);

        batch.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_out_of_range_selection_released() {
        let arena = Arena::new();
        let mut batch = test_batch(&arena);
        for indices in [&[-1i64][..], &[0, 5], &[7]] {
            let sel = SelectionVector::from_indices(&arena, indices).unwrap();
            let err = batch.set_selection(&arena, sel).unwrap_err();
            assert!(matches!(err, ExecError::InvalidBatch(_)));
        }
        assert!(batch.selection().is_none());
        assert_eq!(batch.num_rows(), 5);

        batch.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn test_record_batch_round_trip() {
        let arena = Arena::new();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", ArrowDataType::Int64, true),
            Field::new("name", ArrowDataType::Utf8, true),
        ]));
        let ids = Arc::new(Int64Array::from(vec![Some(1), None, Some(3)])) as ArrayRef;
        let names = Arc::new(StringArray::from(vec!["x", "y", "z"])) as ArrayRef;
        let record = RecordBatch::try_new(schema, vec![ids, names]).unwrap();

        let mut batch = Batch::from_record_batch(&arena, &record).unwrap();
        assert_eq!(batch.attrs(), &["id".to_string(), "name".to_string()]);
        assert!(batch.column(0).unwrap().is_null(1));

        let selection = SelectionVector::from_indices(&arena, &[2, 0]).unwrap();
        batch.set_selection(&arena, selection).unwrap();
        let out = batch.to_record_batch().unwrap();
        assert_eq!(out.num_rows(), 2);
        let ids = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(0), 3);
        assert_eq!(ids.value(1), 1);

        batch.release(&arena);
        assert_eq!(arena.stats().outstanding(), 0);
    }
}
