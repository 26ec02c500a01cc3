//! Proptest strategies for coltable value types.
//!
//! Floats are drawn from finite ranges so that values compare equal after a
//! round trip through storage.
//!
//! # Usage
//!
//! ```no_run
//! use coltable_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(array in strategies::arb_array_of(coltable_types::DataType::Int32, 2, 4)) {
//!         prop_assert!(array.shape().is_valid());
//!     }
//! }
//! ```

use coltable_types::{ArrayData, ArrayValue, Complex, DataType, Shape, Value};
use proptest::{collection::vec, prelude::*};

/// Generates one of the supported data types.
pub fn arb_data_type() -> impl Strategy<Value = DataType> {
    prop::sample::select(DataType::ALL.to_vec())
}

/// Generates a scalar of `data_type`.
pub fn arb_value_of(data_type: DataType) -> BoxedStrategy<Value> {
    match data_type {
        DataType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        DataType::UInt8 => any::<u8>().prop_map(Value::UInt8).boxed(),
        DataType::Int16 => any::<i16>().prop_map(Value::Int16).boxed(),
        DataType::UInt16 => any::<u16>().prop_map(Value::UInt16).boxed(),
        DataType::Int32 => any::<i32>().prop_map(Value::Int32).boxed(),
        DataType::UInt32 => any::<u32>().prop_map(Value::UInt32).boxed(),
        DataType::Int64 => any::<i64>().prop_map(Value::Int64).boxed(),
        DataType::Float32 => (-1.0e6f32..1.0e6).prop_map(Value::Float32).boxed(),
        DataType::Float64 => (-1.0e12f64..1.0e12).prop_map(Value::Float64).boxed(),
        DataType::Complex32 => {
            (-1.0e6f32..1.0e6, -1.0e6f32..1.0e6).prop_map(|(re, im)| Value::Complex32(Complex::new(re, im))).boxed()
        },
        DataType::Complex64 => (-1.0e12f64..1.0e12, -1.0e12f64..1.0e12)
            .prop_map(|(re, im)| Value::Complex64(Complex::new(re, im)))
            .boxed(),
    }
}

/// Generates a scalar of any data type.
pub fn arb_value() -> impl Strategy<Value = Value> {
    arb_data_type().prop_flat_map(arb_value_of)
}

/// Generates a valid shape with 1 to `max_ndim` axes of length 1 to
/// `max_len`.
pub fn arb_shape(max_ndim: usize, max_len: u64) -> impl Strategy<Value = Shape> {
    vec(1..=max_len, 1..=max_ndim.max(1)).prop_map(|dims| Shape::new(dims))
}

/// Generates `len` elements of `data_type`.
pub fn arb_data_of(data_type: DataType, len: usize) -> BoxedStrategy<ArrayData> {
    match data_type {
        DataType::Bool => vec(any::<bool>(), len).prop_map(ArrayData::from).boxed(),
        DataType::UInt8 => vec(any::<u8>(), len).prop_map(ArrayData::from).boxed(),
        DataType::Int16 => vec(any::<i16>(), len).prop_map(ArrayData::from).boxed(),
        DataType::UInt16 => vec(any::<u16>(), len).prop_map(ArrayData::from).boxed(),
        DataType::Int32 => vec(any::<i32>(), len).prop_map(ArrayData::from).boxed(),
        DataType::UInt32 => vec(any::<u32>(), len).prop_map(ArrayData::from).boxed(),
        DataType::Int64 => vec(any::<i64>(), len).prop_map(ArrayData::from).boxed(),
        DataType::Float32 => vec(-1.0e6f32..1.0e6, len).prop_map(ArrayData::from).boxed(),
        DataType::Float64 => vec(-1.0e12f64..1.0e12, len).prop_map(ArrayData::from).boxed(),
        DataType::Complex32 => vec((-1.0e6f32..1.0e6, -1.0e6f32..1.0e6), len)
            .prop_map(|pairs| ArrayData::from(pairs.into_iter().map(|(re, im)| Complex::new(re, im)).collect::<Vec<_>>()))
            .boxed(),
        DataType::Complex64 => vec((-1.0e12f64..1.0e12, -1.0e12f64..1.0e12), len)
            .prop_map(|pairs| ArrayData::from(pairs.into_iter().map(|(re, im)| Complex::new(re, im)).collect::<Vec<_>>()))
            .boxed(),
    }
}

/// Generates an array of `shape` holding `data_type` elements.
pub fn arb_array_with_shape(data_type: DataType, shape: Shape) -> impl Strategy<Value = ArrayValue> {
    let len = shape.product() as usize;
    arb_data_of(data_type, len).prop_filter_map("element count matches shape", move |data| {
        ArrayValue::new(shape.clone(), data).ok()
    })
}

/// Generates an array of `data_type` with a random shape (see [`arb_shape`]).
pub fn arb_array_of(data_type: DataType, max_ndim: usize, max_len: u64) -> impl Strategy<Value = ArrayValue> {
    arb_shape(max_ndim, max_len).prop_flat_map(move |shape| arb_array_with_shape(data_type, shape))
}

/// A change to the row count of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    /// Append this many rows.
    Add(u64),
    /// Remove the row at this position, taken modulo the row count.
    Remove(u64),
}

/// Generates a row operation; appends of up to `max_add` rows are as likely
/// as removals.
pub fn arb_row_op(max_add: u64) -> impl Strategy<Value = RowOp> {
    prop_oneof![(1..=max_add.max(1)).prop_map(RowOp::Add), any::<u64>().prop_map(RowOp::Remove),]
}

/// Generates a sequence of up to `max_len` row operations.
pub fn arb_row_ops(max_len: usize, max_add: u64) -> impl Strategy<Value = Vec<RowOp>> {
    vec(arb_row_op(max_add), 0..=max_len)
}
