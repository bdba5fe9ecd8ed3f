//! Arena-backed typed column.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int64Array,
    StringArray, TimestampMicrosecondArray,
};
use roaring::RoaringBitmap;

use crate::error::{ExecError, Result};
use crate::memory::{Arena, Buffer};
use crate::types::{DataType, Value};

/// A typed column of values with a null bitmap.
///
/// Fixed-width values are stored little-endian in one arena buffer. Strings
/// use a second buffer of `len + 1` little-endian `u64` offsets into the
/// byte buffer. A vector is owned by its batch and must be given back with
/// [`Vector::release`].
#[derive(Debug)]
pub struct Vector {
    data_type: DataType,
    len: usize,
    data: Buffer,
    offsets: Option<Buffer>,
    nulls: RoaringBitmap,
}

impl Vector {
    /// Builds a vector from runtime values. `Value::Null` marks a null row.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if a value does not match `data_type`, or an
    /// arena error if storage cannot be acquired.
    pub fn from_values(arena: &Arena, data_type: DataType, values: &[Value]) -> Result<Self> {
        if let Some(bad) = values
            .iter()
            .find(|v| !v.is_null() && v.data_type() != Some(data_type))
        {
            return Err(ExecError::TypeError {
                expected: data_type.name().to_string(),
                actual: bad
                    .data_type()
                    .map_or_else(|| "NULL".to_string(), |t| t.name().to_string()),
            });
        }

        let mut nulls = RoaringBitmap::new();
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                nulls.insert(i as u32);
            }
        }

        match data_type.byte_size() {
            Some(width) => {
                let mut data = arena.acquire(values.len() * width)?;
                let bytes = data.as_mut_slice();
                for (i, value) in values.iter().enumerate() {
                    encode_fixed(value, &mut bytes[i * width..(i + 1) * width]);
                }
                Ok(Self {
                    data_type,
                    len: values.len(),
                    data,
                    offsets: None,
                    nulls,
                })
            }
            None => {
                let total: usize = values
                    .iter()
                    .map(|v| v.as_string().map_or(0, str::len))
                    .sum();
                let mut offsets = arena.acquire((values.len() + 1) * 8)?;
                let mut data = match arena.acquire(total) {
                    Ok(data) => data,
                    Err(e) => {
                        arena.release(offsets);
                        return Err(e);
                    }
                };
                let mut cursor = 0usize;
                for (i, value) in values.iter().enumerate() {
                    if let Some(s) = value.as_string() {
                        data.as_mut_slice()[cursor..cursor + s.len()].copy_from_slice(s.as_bytes());
                        cursor += s.len();
                    }
                    offsets.set_i64(i + 1, cursor as i64);
                }
                Ok(Self {
                    data_type,
                    len: values.len(),
                    data,
                    offsets: Some(offsets),
                    nulls,
                })
            }
        }
    }

    /// Builds a non-null `Int64` vector.
    ///
    /// # Errors
    ///
    /// Returns an arena error if storage cannot be acquired.
    pub fn from_i64s(arena: &Arena, values: &[i64]) -> Result<Self> {
        let values: Vec<Value> = values.iter().copied().map(Value::Int64).collect();
        Self::from_values(arena, DataType::Int64, &values)
    }

    /// Builds a non-null `String` vector.
    ///
    /// # Errors
    ///
    /// Returns an arena error if storage cannot be acquired.
    pub fn from_strs(arena: &Arena, values: &[&str]) -> Result<Self> {
        let values: Vec<Value> = values.iter().map(|s| Value::String((*s).to_string())).collect();
        Self::from_values(arena, DataType::String, &values)
    }

    /// Imports an Arrow array.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for Arrow types without a counterpart.
    pub fn from_arrow(arena: &Arena, array: &dyn Array) -> Result<Self> {
        let data_type = DataType::from_arrow(array.data_type()).ok_or_else(|| {
            ExecError::UnsupportedOperation(format!(
                "Arrow type {} has no column type",
                array.data_type()
            ))
        })?;
        let values = arrow_values(data_type, array)?;
        Self::from_values(arena, data_type, &values)
    }

    /// Returns the column type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn length(&self) -> usize {
        self.len
    }

    /// Returns true if the vector has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the null bitmap.
    #[must_use]
    pub fn nulls(&self) -> &RoaringBitmap {
        &self.nulls
    }

    /// Returns true if row `row` is null.
    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        self.nulls.contains(row as u32)
    }

    /// Returns the raw bytes of row `row`.
    ///
    /// Null rows expose zeroed bytes for fixed-width types and an empty slice
    /// for strings.
    #[must_use]
    pub fn row_bytes(&self, row: usize) -> &[u8] {
        match (&self.offsets, self.data_type.byte_size()) {
            (Some(offsets), _) => {
                let start = offsets.i64_at(row) as usize;
                let end = offsets.i64_at(row + 1) as usize;
                &self.data.as_slice()[start..end]
            }
            (None, Some(width)) => &self.data.as_slice()[row * width..(row + 1) * width],
            (None, None) => &[],
        }
    }

    /// Compares row `row` with row `other_row` of `other`.
    ///
    /// Two nulls are equal; a null never equals a value.
    #[must_use]
    pub fn row_eq(&self, row: usize, other: &Vector, other_row: usize) -> bool {
        if self.data_type != other.data_type {
            return false;
        }
        match (self.is_null(row), other.is_null(other_row)) {
            (true, true) => true,
            (false, false) => self.row_bytes(row) == other.row_bytes(other_row),
            _ => false,
        }
    }

    /// Decodes row `row` into a runtime value.
    #[must_use]
    pub fn value(&self, row: usize) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        let bytes = self.row_bytes(row);
        match self.data_type {
            DataType::Int64 => Value::Int64(i64::from_le_bytes(fixed(bytes))),
            DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(fixed(bytes))),
            DataType::Float64 => Value::Float64(f64::from_le_bytes(fixed(bytes))),
            DataType::Float32 => Value::Float32(f32::from_le_bytes(fixed(bytes))),
            DataType::Date => Value::Date(i32::from_le_bytes(fixed(bytes))),
            DataType::Bool => Value::Bool(bytes[0] != 0),
            DataType::String => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Exports the vector as an Arrow array.
    #[must_use]
    pub fn to_arrow(&self) -> ArrayRef {
        let rows = 0..self.len;
        match self.data_type {
            DataType::Int64 => Arc::new(Int64Array::from(
                rows.map(|i| self.value(i).as_int64()).collect::<Vec<_>>(),
            )),
            DataType::Timestamp => Arc::new(TimestampMicrosecondArray::from(
                rows.map(|i| match self.value(i) {
                    Value::Timestamp(t) => Some(t),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            )),
            DataType::Float64 => Arc::new(Float64Array::from(
                rows.map(|i| self.value(i).as_float64()).collect::<Vec<_>>(),
            )),
            DataType::Float32 => Arc::new(Float32Array::from(
                rows.map(|i| match self.value(i) {
                    Value::Float32(f) => Some(f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            )),
            DataType::Date => Arc::new(Date32Array::from(
                rows.map(|i| match self.value(i) {
                    Value::Date(d) => Some(d),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            )),
            DataType::Bool => Arc::new(BooleanArray::from(
                rows.map(|i| match self.value(i) {
                    Value::Bool(b) => Some(b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            )),
            DataType::String => {
                let values: Vec<Option<String>> = rows
                    .map(|i| match self.value(i) {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                Arc::new(StringArray::from(values))
            }
        }
    }

    /// Returns the vector's storage to the arena.
    pub fn release(self, arena: &Arena) {
        arena.release(self.data);
        if let Some(offsets) = self.offsets {
            arena.release(offsets);
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    raw
}

fn encode_fixed(value: &Value, dst: &mut [u8]) {
    match value {
        Value::Int64(v) | Value::Timestamp(v) => dst.copy_from_slice(&v.to_le_bytes()),
        Value::Float64(v) => dst.copy_from_slice(&v.to_le_bytes()),
        Value::Float32(v) => dst.copy_from_slice(&v.to_le_bytes()),
        Value::Date(v) => dst.copy_from_slice(&v.to_le_bytes()),
        Value::Bool(v) => dst[0] = u8::from(*v),
        Value::String(_) | Value::Null => {}
    }
}

fn downcast<'a, T: 'static>(array: &'a dyn Array) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ExecError::UnsupportedOperation(format!(
            "unexpected Arrow array for {}",
            array.data_type()
        ))
    })
}

fn arrow_values(data_type: DataType, array: &dyn Array) -> Result<Vec<Value>> {
    let rows = 0..array.len();
    let values = match data_type {
        DataType::Int64 => {
            let arr = downcast::<Int64Array>(array)?;
            rows.map(|i| if arr.is_null(i) { Value::Null } else { Value::Int64(arr.value(i)) })
                .collect()
        }
        DataType::Timestamp => {
            let arr = downcast::<TimestampMicrosecondArray>(array)?;
            rows.map(|i| {
                if arr.is_null(i) {
                    Value::Null
                } else {
                    Value::Timestamp(arr.value(i))
                }
            })
            .collect()
        }
        DataType::Float64 => {
            let arr = downcast::<Float64Array>(array)?;
            rows.map(|i| if arr.is_null(i) { Value::Null } else { Value::Float64(arr.value(i)) })
                .collect()
        }
        DataType::Float32 => {
            let arr = downcast::<Float32Array>(array)?;
            rows.map(|i| if arr.is_null(i) { Value::Null } else { Value::Float32(arr.value(i)) })
                .collect()
        }
        DataType::Date => {
            let arr = downcast::<Date32Array>(array)?;
            rows.map(|i| if arr.is_null(i) { Value::Null } else { Value::Date(arr.value(i)) })
                .collect()
        }
        DataType::Bool => {
            let arr = downcast::<BooleanArray>(array)?;
            rows.map(|i| if arr.is_null(i) { Value::Null } else { Value::Bool(arr.value(i)) })
                .collect()
        }
        DataType::String => {
            let arr = downcast::<StringArray>(array)?;
            rows.map(|i| {
                if arr.is_null(i) {
                    Value::Null
                } else {
                    Value::String(arr.value(i).to_string())
                }
            })
            .collect()
        }
    };
    Ok(values)
}
