//! Array shapes and rectangular slices.
//!
//! Arrays are laid out in column-major order: the first axis varies fastest.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ArrayError, Result};

/// An ordered list of per-axis extents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<u64>);

impl Shape {
    /// Creates a shape from per-axis extents.
    pub fn new(dims: impl Into<Vec<u64>>) -> Self {
        Self(dims.into())
    }

    /// Number of axes.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Per-axis extents.
    #[must_use]
    pub fn dims(&self) -> &[u64] {
        &self.0
    }

    /// Total number of elements (1 for a zero-dimensional shape).
    #[must_use]
    pub fn product(&self) -> u64 {
        self.0.iter().product()
    }

    /// Returns `true` if every extent is non-zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|d| *d > 0)
    }

    /// Linear (column-major) offset of `position` inside this shape.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::SliceOutOfBounds`] if `position` lies outside
    /// the shape or has the wrong number of axes.
    pub fn offset_of(&self, position: &[u64]) -> Result<u64> {
        if position.len() != self.ndim() || position.iter().zip(&self.0).any(|(p, d)| p >= d) {
            return Err(ArrayError::SliceOutOfBounds {
                shape: self.clone(),
                start: Shape::new(position),
                length: Shape::new(vec![1; position.len()]),
            });
        }
        let mut offset = 0;
        let mut stride = 1;
        for (p, d) in position.iter().zip(&self.0) {
            offset += p * stride;
            stride *= d;
        }
        Ok(offset)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

impl From<Vec<u64>> for Shape {
    fn from(dims: Vec<u64>) -> Self {
        Self(dims)
    }
}

impl<const N: usize> From<[u64; N]> for Shape {
    fn from(dims: [u64; N]) -> Self {
        Self(dims.to_vec())
    }
}

/// A rectangular, stride-1 section of an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slicer {
    start: Shape,
    length: Shape,
}

impl Slicer {
    /// Creates a slicer from a start position and per-axis lengths.
    pub fn new(start: impl Into<Shape>, length: impl Into<Shape>) -> Self {
        Self { start: start.into(), length: length.into() }
    }

    /// Start position of the section.
    #[must_use]
    pub fn start(&self) -> &Shape {
        &self.start
    }

    /// Shape of the section.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.length
    }

    /// Checks that the section lies inside an array of `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::SliceOutOfBounds`] if it does not.
    pub fn check(&self, shape: &Shape) -> Result<()> {
        let fits = self.start.ndim() == shape.ndim()
            && self.length.ndim() == shape.ndim()
            && self
                .start
                .dims()
                .iter()
                .zip(self.length.dims())
                .zip(shape.dims())
                .all(|((s, l), d)| *l > 0 && s + l <= *d);
        if fits {
            Ok(())
        } else {
            Err(ArrayError::SliceOutOfBounds {
                shape: shape.clone(),
                start: self.start.clone(),
                length: self.length.clone(),
            })
        }
    }

    /// Contiguous runs of the section inside an array of `shape`.
    ///
    /// Each run is `(linear offset, element count)`; runs are returned in the
    /// column-major order of the section's own elements. The section must
    /// have passed [`check`](Self::check).
    #[must_use]
    pub fn runs(&self, shape: &Shape) -> Vec<(u64, u64)> {
        let ndim = shape.ndim();
        let dims = shape.dims();
        let start = self.start.dims();
        let length = self.length.dims();
        let run = length[0];
        let nruns: u64 = length[1..].iter().product();
        let mut runs = Vec::with_capacity(nruns as usize);
        let mut counter = vec![0u64; ndim];
        for _ in 0..nruns {
            let mut offset = 0;
            let mut stride = 1;
            for axis in 0..ndim {
                offset += (start[axis] + counter[axis]) * stride;
                stride *= dims[axis];
            }
            runs.push((offset, run));
            for axis in 1..ndim {
                counter[axis] += 1;
                if counter[axis] < length[axis] {
                    break;
                }
                counter[axis] = 0;
            }
        }
        runs
    }
}
