//! Error types for value, shape, and array handling.

use snafu::Snafu;

use crate::{shape::Shape, value::DataType};

/// Result type alias for value and array operations.
pub type Result<T, E = ArrayError> = std::result::Result<T, E>;

/// Errors raised while building, slicing, or decoding arrays and values.
#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum ArrayError {
    /// The number of elements does not match the shape.
    #[snafu(display("array has {found} elements but shape {shape} needs {expected}"))]
    LengthMismatch {
        /// Shape the data was meant for.
        shape: Shape,
        /// Element count implied by the shape.
        expected: u64,
        /// Element count actually supplied.
        found: u64,
    },

    /// Element type does not match.
    #[snafu(display("data type mismatch: expected {expected}, found {found}"))]
    TypeMismatch {
        /// The expected data type.
        expected: DataType,
        /// The data type found.
        found: DataType,
    },

    /// Two shapes that must be equal differ.
    #[snafu(display("shape mismatch: expected {expected}, found {found}"))]
    ShapeMismatch {
        /// The expected shape.
        expected: Shape,
        /// The shape found.
        found: Shape,
    },

    /// A slice does not fit inside the array.
    #[snafu(display("slice start {start} length {length} outside array shape {shape}"))]
    SliceOutOfBounds {
        /// The array shape.
        shape: Shape,
        /// Slice start position.
        start: Shape,
        /// Slice length per axis.
        length: Shape,
    },

    /// A buffer is too small for the requested decode.
    #[snafu(display("buffer too short: need {needed} bytes, found {found}"))]
    BufferTooShort {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        found: usize,
    },

    /// Unknown data type tag in a persisted record.
    #[snafu(display("unknown data type tag {tag}"))]
    UnknownDataType {
        /// The unrecognized tag.
        tag: u8,
    },
}
