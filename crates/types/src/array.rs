//! Typed N-dimensional array values.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ArrayError, Result},
    shape::{Shape, Slicer},
    value::{Complex32, Complex64, DataType, Element, Endian, Value},
};

/// Element storage of an array, one variant per data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    /// Booleans.
    Bool(Vec<bool>),
    /// Unsigned 8-bit integers.
    UInt8(Vec<u8>),
    /// Signed 16-bit integers.
    Int16(Vec<i16>),
    /// Unsigned 16-bit integers.
    UInt16(Vec<u16>),
    /// Signed 32-bit integers.
    Int32(Vec<i32>),
    /// Unsigned 32-bit integers.
    UInt32(Vec<u32>),
    /// Signed 64-bit integers.
    Int64(Vec<i64>),
    /// Single precision floats.
    Float32(Vec<f32>),
    /// Double precision floats.
    Float64(Vec<f64>),
    /// Single precision complex numbers.
    Complex32(Vec<Complex32>),
    /// Double precision complex numbers.
    Complex64(Vec<Complex64>),
}

macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            ArrayData::Complex32($v) => $body,
            ArrayData::Complex64($v) => $body,
        }
    };
}

macro_rules! with_new_data {
    ($data_type:expr, $T:ident => $body:expr) => {
        match $data_type {
            DataType::Bool => {
                type $T = bool;
                ArrayData::Bool($body)
            },
            DataType::UInt8 => {
                type $T = u8;
                ArrayData::UInt8($body)
            },
            DataType::Int16 => {
                type $T = i16;
                ArrayData::Int16($body)
            },
            DataType::UInt16 => {
                type $T = u16;
                ArrayData::UInt16($body)
            },
            DataType::Int32 => {
                type $T = i32;
                ArrayData::Int32($body)
            },
            DataType::UInt32 => {
                type $T = u32;
                ArrayData::UInt32($body)
            },
            DataType::Int64 => {
                type $T = i64;
                ArrayData::Int64($body)
            },
            DataType::Float32 => {
                type $T = f32;
                ArrayData::Float32($body)
            },
            DataType::Float64 => {
                type $T = f64;
                ArrayData::Float64($body)
            },
            DataType::Complex32 => {
                type $T = Complex32;
                ArrayData::Complex32($body)
            },
            DataType::Complex64 => {
                type $T = Complex64;
                ArrayData::Complex64($body)
            },
        }
    };
}

macro_rules! copy_elements {
    ($dst:expr, $src:expr, $to:expr, $from:expr, $count:expr; $($variant:ident),*) => {
        match ($dst, $src) {
            $(
                (ArrayData::$variant(d), ArrayData::$variant(s)) => {
                    d[$to..$to + $count].copy_from_slice(&s[$from..$from + $count]);
                    Ok(())
                },
            )*
            (d, s) => Err(ArrayError::TypeMismatch { expected: d.data_type(), found: s.data_type() }),
        }
    };
}

impl ArrayData {
    /// Zero-filled storage of `len` elements.
    #[must_use]
    pub fn zeros(data_type: DataType, len: usize) -> Self {
        with_new_data!(data_type, T => vec![T::default(); len])
    }

    /// Element data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        with_data!(self, v => slice_type(v))
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        with_data!(self, v => v.len())
    }

    /// Returns `true` if there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns element `index` as a dynamically typed value.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        with_data!(self, v => v.get(index).map(|e| e.into_value()))
    }

    /// Encodes all elements into `out` using `endian`.
    ///
    /// `out` must hold `len() * data_type().size()` bytes.
    pub fn encode(&self, endian: Endian, out: &mut [u8]) {
        match endian {
            Endian::Big => with_data!(self, v => encode_slice::<BigEndian, _>(v, out)),
            Endian::Little => with_data!(self, v => encode_slice::<LittleEndian, _>(v, out)),
        }
    }

    /// Decodes `len` elements of `data_type` from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::BufferTooShort`] if `buf` is too small.
    pub fn decode(data_type: DataType, endian: Endian, len: usize, buf: &[u8]) -> Result<Self> {
        let needed = len * data_type.size();
        if buf.len() < needed {
            return Err(ArrayError::BufferTooShort { needed, found: buf.len() });
        }
        Ok(match endian {
            Endian::Big => with_new_data!(data_type, T => decode_slice::<BigEndian, T>(len, buf)),
            Endian::Little => {
                with_new_data!(data_type, T => decode_slice::<LittleEndian, T>(len, buf))
            },
        })
    }

    /// Copies `count` elements starting at `from` in `src` to `to` in `self`.
    fn copy_from(&mut self, to: usize, src: &ArrayData, from: usize, count: usize) -> Result<()> {
        copy_elements!(
            self, src, to, from, count;
            Bool, UInt8, Int16, UInt16, Int32, UInt32, Int64, Float32, Float64, Complex32, Complex64
        )
    }
}

fn slice_type<T: Element>(_: &[T]) -> DataType {
    T::DATA_TYPE
}

fn encode_slice<B: ByteOrder, T: Element>(values: &[T], out: &mut [u8]) {
    let size = T::DATA_TYPE.size();
    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(size)) {
        value.write::<B>(chunk);
    }
}

fn decode_slice<B: ByteOrder, T: Element>(len: usize, buf: &[u8]) -> Vec<T> {
    let size = T::DATA_TYPE.size();
    buf.chunks_exact(size).take(len).map(T::read::<B>).collect()
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<Vec<$ty>> for ArrayData {
                fn from(v: Vec<$ty>) -> Self {
                    ArrayData::$variant(v)
                }
            }
        )*
    };
}

impl_from_vec!(
    bool => Bool, u8 => UInt8, i16 => Int16, u16 => UInt16, i32 => Int32, u32 => UInt32,
    i64 => Int64, f32 => Float32, f64 => Float64, Complex32 => Complex32, Complex64 => Complex64
);

/// An N-dimensional array: a shape plus column-major element storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    shape: Shape,
    data: ArrayData,
}

impl ArrayValue {
    /// Creates an array, checking that the element count matches the shape.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::LengthMismatch`] if `data.len() != shape.product()`.
    pub fn new(shape: impl Into<Shape>, data: impl Into<ArrayData>) -> Result<Self> {
        let shape = shape.into();
        let data = data.into();
        if data.len() as u64 != shape.product() {
            return Err(ArrayError::LengthMismatch {
                expected: shape.product(),
                found: data.len() as u64,
                shape,
            });
        }
        Ok(Self { shape, data })
    }

    /// A one-dimensional array holding `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self
    where
        ArrayData: From<Vec<T>>,
    {
        let shape = Shape::new([values.len() as u64]);
        Self { shape, data: ArrayData::from(values) }
    }

    /// A zero-filled array.
    #[must_use]
    pub fn zeros(data_type: DataType, shape: Shape) -> Self {
        let data = ArrayData::zeros(data_type, shape.product() as usize);
        Self { shape, data }
    }

    /// Array shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Element storage.
    #[must_use]
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Consumes the array, returning its element storage.
    #[must_use]
    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// Element data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size in bytes of the external representation of all elements.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len() * self.data_type().size()
    }

    /// Element at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::SliceOutOfBounds`] if `position` is outside the array.
    pub fn get(&self, position: &[u64]) -> Result<Value> {
        let offset = self.shape.offset_of(position)? as usize;
        self.data.get(offset).ok_or_else(|| ArrayError::SliceOutOfBounds {
            shape: self.shape.clone(),
            start: Shape::new(position),
            length: Shape::new(vec![1; position.len()]),
        })
    }

    /// Extracts a section of this array as a new array.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::SliceOutOfBounds`] if the section does not fit.
    pub fn slice(&self, slicer: &Slicer) -> Result<ArrayValue> {
        slicer.check(&self.shape)?;
        let mut out = ArrayValue::zeros(self.data_type(), slicer.shape().clone());
        let mut pos = 0;
        for (offset, count) in slicer.runs(&self.shape) {
            out.data.copy_from(pos, &self.data, offset as usize, count as usize)?;
            pos += count as usize;
        }
        Ok(out)
    }

    /// Overwrites a section of this array with `section`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::SliceOutOfBounds`] if the section does not fit,
    /// [`ArrayError::ShapeMismatch`] if `section` has a different shape than
    /// the slicer, or [`ArrayError::TypeMismatch`] on differing element types.
    pub fn put_slice(&mut self, slicer: &Slicer, section: &ArrayValue) -> Result<()> {
        slicer.check(&self.shape)?;
        if section.shape() != slicer.shape() {
            return Err(ArrayError::ShapeMismatch {
                expected: slicer.shape().clone(),
                found: section.shape().clone(),
            });
        }
        let mut pos = 0;
        for (offset, count) in slicer.runs(&self.shape) {
            self.data.copy_from(offset as usize, &section.data, pos, count as usize)?;
            pos += count as usize;
        }
        Ok(())
    }

    /// Encodes the elements using `endian`.
    #[must_use]
    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len()];
        self.data.encode(endian, &mut out);
        out
    }

    /// Decodes an array of `shape` and `data_type` from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::BufferTooShort`] if `buf` is too small.
    pub fn from_bytes(data_type: DataType, shape: Shape, endian: Endian, buf: &[u8]) -> Result<Self> {
        let data = ArrayData::decode(data_type, endian, shape.product() as usize, buf)?;
        Ok(Self { shape, data })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::value::Complex;

    #[test]
    fn test_new_checks_length() {
        assert!(ArrayValue::new([2, 2], vec![1i32, 2, 3, 4]).is_ok());
        let err = ArrayValue::new([2, 2], vec![1i32, 2, 3]).unwrap_err();
        assert!(matches!(err, ArrayError::LengthMismatch { expected: 4, found: 3, .. }));
    }

    #[test]
    fn test_bytes_round_trip_both_orders() {
        let arr = ArrayValue::new(
            [2, 2],
            vec![Complex::new(1.0f64, 2.0), Complex::new(3.0, 4.0), Complex::new(-1.0, 0.5), Complex::default()],
        )
        .unwrap();
        for endian in [Endian::Big, Endian::Little] {
            let bytes = arr.to_bytes(endian);
            assert_eq!(bytes.len(), 4 * 16);
            let back =
                ArrayValue::from_bytes(DataType::Complex64, arr.shape().clone(), endian, &bytes)
                    .unwrap();
            assert_eq!(back, arr);
        }
    }

    #[test]
    fn test_slice_and_put_slice() {
        let mut arr = ArrayValue::new([3, 3], (0..9).collect::<Vec<i64>>()).unwrap();
        let slicer = Slicer::new([1, 1], [2, 2]);
        let section = arr.slice(&slicer).unwrap();
        assert_eq!(section, ArrayValue::new([2, 2], vec![4i64, 5, 7, 8]).unwrap());

        let replacement = ArrayValue::new([2, 2], vec![-1i64, -2, -3, -4]).unwrap();
        arr.put_slice(&slicer, &replacement).unwrap();
        assert_eq!(arr.get(&[1, 1]).unwrap(), Value::Int64(-1));
        assert_eq!(arr.get(&[2, 2]).unwrap(), Value::Int64(-4));
        assert_eq!(arr.get(&[0, 0]).unwrap(), Value::Int64(0));
    }

    #[test]
    fn test_put_slice_rejects_wrong_type() {
        let mut arr = ArrayValue::zeros(DataType::Float32, Shape::new([4]));
        let section = ArrayValue::from_vec(vec![1i32, 2]);
        let err = arr.put_slice(&Slicer::new([0], [2]), &section).unwrap_err();
        assert!(matches!(err, ArrayError::TypeMismatch { .. }));
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = ArrayData::decode(DataType::Int32, Endian::Big, 3, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, ArrayError::BufferTooShort { needed: 12, found: 8 }));
    }
}
