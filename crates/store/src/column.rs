//! Column descriptions and the shape rules of the column data layer.

use coltable_types::{DataType, Keywords, Shape};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, RowId};

/// Size of the inline descriptor of a variable-shaped array cell.
pub const HEAP_POINTER_SIZE: usize = 8;

/// The closed set of column kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// One scalar per row.
    Scalar,
    /// An array of the same shape in every row, stored inline.
    FixedArray(Shape),
    /// An array whose shape may differ per row, stored in the array heap.
    ///
    /// If `ndim` is set, every row's array must have that many axes.
    VariableArray {
        /// Required number of axes, if any.
        ndim: Option<usize>,
    },
}

/// Storage manager a column is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StManBinding {
    /// Registered storage manager type (e.g. `StandardStMan`).
    pub type_name: String,
    /// Name of the storage manager instance.
    pub name: String,
}

/// Description of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDesc {
    /// Column name, unique within a table.
    pub name: String,
    /// Element data type.
    pub data_type: DataType,
    /// Scalar, fixed array, or variable array.
    pub kind: ColumnKind,
    /// Free-form comment.
    pub comment: String,
    /// Column keywords.
    pub keywords: Keywords,
    /// Storage manager to use; the table default if `None`.
    pub binding: Option<StManBinding>,
}

impl ColumnDesc {
    fn with_kind(name: impl Into<String>, data_type: DataType, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind,
            comment: String::new(),
            keywords: Keywords::new(),
            binding: None,
        }
    }

    /// A scalar column.
    pub fn scalar(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_kind(name, data_type, ColumnKind::Scalar)
    }

    /// A fixed-shape array column.
    pub fn fixed_array(name: impl Into<String>, data_type: DataType, shape: impl Into<Shape>) -> Self {
        Self::with_kind(name, data_type, ColumnKind::FixedArray(shape.into()))
    }

    /// A variable-shape array column.
    pub fn variable_array(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_kind(name, data_type, ColumnKind::VariableArray { ndim: None })
    }

    /// Requires every array in a variable-shape column to have `ndim` axes.
    #[must_use]
    pub fn with_ndim(mut self, ndim: usize) -> Self {
        if let ColumnKind::VariableArray { ndim: n } = &mut self.kind {
            *n = Some(ndim);
        }
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Binds the column to a storage manager instance.
    #[must_use]
    pub fn bind(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.binding = Some(StManBinding { type_name: type_name.into(), name: name.into() });
        self
    }

    /// Returns `true` for array columns.
    pub fn is_array(&self) -> bool {
        !matches!(self.kind, ColumnKind::Scalar)
    }

    /// Whether a row's shape can differ from the others.
    pub fn can_change_shape(&self) -> bool {
        matches!(self.kind, ColumnKind::VariableArray { .. })
    }

    /// Whether slices of a cell can be accessed.
    pub fn can_access_slice(&self) -> bool {
        self.is_array()
    }

    /// Whether the whole scalar column can be read or written in one call.
    pub fn can_access_scalar_column(&self) -> bool {
        matches!(self.kind, ColumnKind::Scalar)
    }

    /// Whether all arrays of the column can be read or written as one array
    /// with the row number as last axis.
    pub fn can_access_array_column(&self) -> bool {
        matches!(self.kind, ColumnKind::FixedArray(_))
    }

    /// Bytes taken by one cell inside a bucket row slot.
    pub fn cell_width(&self) -> usize {
        match &self.kind {
            ColumnKind::Scalar => self.data_type.size(),
            // One leading byte flags whether the cell is defined.
            ColumnKind::FixedArray(shape) => 1 + shape.product() as usize * self.data_type.size(),
            ColumnKind::VariableArray { .. } => HEAP_POINTER_SIZE,
        }
    }

    /// Checks the description itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidColumn`] for an empty name or an invalid fixed
    /// shape.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidColumn {
                name: self.name.clone(),
                reason: "empty column name".to_string(),
            });
        }
        match &self.kind {
            ColumnKind::FixedArray(shape) if !shape.is_valid() => Err(Error::InvalidColumn {
                name: self.name.clone(),
                reason: format!("fixed shape {shape} is not valid"),
            }),
            ColumnKind::VariableArray { ndim: Some(0) } => Err(Error::InvalidColumn {
                name: self.name.clone(),
                reason: "ndim must be at least 1".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Checks that an array of `shape` may be stored in `row`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the column has a fixed shape that
    /// differs from `shape`, if `shape` has the wrong number of axes, or if
    /// it has an empty axis; [`Error::UnsupportedOperation`] for a scalar
    /// column.
    pub fn check_put_shape(&self, row: RowId, shape: &Shape) -> Result<()> {
        let mismatch = |expected: Shape| Error::ShapeMismatch {
            column: self.name.clone(),
            row,
            expected,
            found: shape.clone(),
        };
        match &self.kind {
            ColumnKind::Scalar => {
                Err(Error::UnsupportedOperation { column: self.name.clone(), operation: "arrays" })
            },
            ColumnKind::FixedArray(fixed) => {
                if fixed == shape {
                    Ok(())
                } else {
                    Err(mismatch(fixed.clone()))
                }
            },
            ColumnKind::VariableArray { ndim } => {
                if ndim.is_some_and(|n| n != shape.ndim()) || !shape.is_valid() {
                    let axes = ndim.unwrap_or(shape.ndim().max(1));
                    Err(mismatch(Shape::new(vec![1; axes])))
                } else {
                    Ok(())
                }
            },
        }
    }

    /// Checks that values of `data_type` may be stored in this column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnTypeMismatch`] if the types differ.
    pub fn check_type(&self, data_type: DataType) -> Result<()> {
        if self.data_type == data_type {
            Ok(())
        } else {
            Err(Error::ColumnTypeMismatch {
                column: self.name.clone(),
                expected: self.data_type,
                found: data_type,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_widths() {
        assert_eq!(ColumnDesc::scalar("a", DataType::Complex64).cell_width(), 16);
        assert_eq!(ColumnDesc::fixed_array("b", DataType::Int32, [4]).cell_width(), 17);
        assert_eq!(ColumnDesc::variable_array("c", DataType::Float64).cell_width(), 8);
    }

    #[test]
    fn test_capabilities() {
        let scalar = ColumnDesc::scalar("a", DataType::Int32);
        let fixed = ColumnDesc::fixed_array("b", DataType::Int32, [2, 2]);
        let var = ColumnDesc::variable_array("c", DataType::Int32);
        assert!(!scalar.can_change_shape() && !fixed.can_change_shape() && var.can_change_shape());
        assert!(!scalar.can_access_slice() && fixed.can_access_slice());
        assert!(scalar.can_access_scalar_column() && !var.can_access_scalar_column());
        assert!(fixed.can_access_array_column() && !var.can_access_array_column());
    }

    #[test]
    fn test_fixed_shape_rejects_other_shapes() {
        let col = ColumnDesc::fixed_array("ints", DataType::Int32, [4]);
        assert!(col.check_put_shape(0, &Shape::new([4])).is_ok());
        let err = col.check_put_shape(1, &Shape::new([3])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { row: 1, .. }));
        assert!(err.is_checked());
    }

    #[test]
    fn test_variable_shape_ndim() {
        let col = ColumnDesc::variable_array("d", DataType::Float64).with_ndim(2);
        assert!(col.check_put_shape(0, &Shape::new([3, 5])).is_ok());
        assert!(col.check_put_shape(0, &Shape::new([15])).is_err());
        assert!(col.check_put_shape(0, &Shape::new([0, 5])).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ColumnDesc::scalar("", DataType::Bool).validate().is_err());
        assert!(ColumnDesc::fixed_array("x", DataType::Bool, [2, 0]).validate().is_err());
        assert!(ColumnDesc::variable_array("x", DataType::Bool).with_ndim(0).validate().is_err());
        assert!(ColumnDesc::variable_array("x", DataType::Bool).validate().is_ok());
    }
}
