//! Core value types, configuration, and codecs for coltable.
//!
//! This crate provides the collaborator types used by the storage engine:
//! - Scalar data types and their fixed-size external representation
//! - Shapes, slicers, and typed N-dimensional arrays (column-major)
//! - Keyword records attached to tables and columns
//! - Validated configuration for storage and locking
//! - Postcard codec for persisted metadata
//! - Error types using snafu

pub mod array;
pub mod codec;
pub mod config;
pub mod error;
pub mod keywords;
pub mod shape;
pub mod value;

// Re-export commonly used types at crate root
pub use array::{ArrayData, ArrayValue};
pub use error::{ArrayError, Result};
pub use keywords::{KeywordValue, Keywords};
pub use shape::{Shape, Slicer};
pub use value::{Complex, Complex32, Complex64, DataType, Element, Endian, Value};
