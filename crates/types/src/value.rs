//! Scalar data types and their fixed-size external representation.
//!
//! Every cell value stored by the engine has a fixed external width given by
//! [`DataType::size`]. Values are written in the byte order recorded in the
//! owning file's header ([`Endian`]), so a file written on one machine can be
//! read on any other.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ArrayError, Result};

/// Byte order used for the external representation of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Endian {
    /// Big-endian ("canonical") representation.
    Big,
    /// Little-endian representation.
    Little,
}

impl Endian {
    /// Byte order of the running machine ("local" representation).
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") { Endian::Big } else { Endian::Little }
    }

    /// Tag byte stored in file headers.
    #[must_use]
    pub const fn to_tag(self) -> u8 {
        match self {
            Endian::Big => b'B',
            Endian::Little => b'L',
        }
    }

    /// Parses a header tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'B' => Some(Endian::Big),
            b'L' => Some(Endian::Little),
            _ => None,
        }
    }

    /// Writes a `u32` in this byte order.
    pub fn write_u32(self, out: &mut [u8], value: u32) {
        match self {
            Endian::Big => BigEndian::write_u32(out, value),
            Endian::Little => LittleEndian::write_u32(out, value),
        }
    }

    /// Reads a `u32` in this byte order.
    #[must_use]
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Big => BigEndian::read_u32(buf),
            Endian::Little => LittleEndian::read_u32(buf),
        }
    }

    /// Writes a `u64` in this byte order.
    pub fn write_u64(self, out: &mut [u8], value: u64) {
        match self {
            Endian::Big => BigEndian::write_u64(out, value),
            Endian::Little => LittleEndian::write_u64(out, value),
        }
    }

    /// Reads a `u64` in this byte order.
    #[must_use]
    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Big => BigEndian::read_u64(buf),
            Endian::Little => LittleEndian::read_u64(buf),
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Big
    }
}

/// A complex number with components of type `T`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex<T> {
    /// Real part.
    pub re: T,
    /// Imaginary part.
    pub im: T,
}

impl<T> Complex<T> {
    /// Creates a complex number.
    pub const fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// Single precision complex number.
pub type Complex32 = Complex<f32>;
/// Double precision complex number.
pub type Complex64 = Complex<f64>;

/// Element data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[repr(u8)]
pub enum DataType {
    /// Boolean, stored as one byte.
    Bool = 1,
    /// Unsigned 8-bit integer.
    UInt8 = 2,
    /// Signed 16-bit integer.
    Int16 = 3,
    /// Unsigned 16-bit integer.
    UInt16 = 4,
    /// Signed 32-bit integer.
    Int32 = 5,
    /// Unsigned 32-bit integer.
    UInt32 = 6,
    /// Signed 64-bit integer.
    Int64 = 7,
    /// IEEE 754 single precision.
    Float32 = 8,
    /// IEEE 754 double precision.
    Float64 = 9,
    /// Single precision complex.
    Complex32 = 10,
    /// Double precision complex.
    Complex64 = 11,
}

impl DataType {
    /// External size in bytes of one element.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            DataType::Bool | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 | DataType::Complex32 => 8,
            DataType::Complex64 => 16,
        }
    }

    /// Human readable type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DataType::Bool => "Bool",
            DataType::UInt8 => "UInt8",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Complex32 => "Complex32",
            DataType::Complex64 => "Complex64",
        }
    }

    /// All supported data types.
    pub const ALL: [DataType; 11] = [
        DataType::Bool,
        DataType::UInt8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
        DataType::Complex32,
        DataType::Complex64,
    ];
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for DataType {
    type Error = ArrayError;

    fn try_from(tag: u8) -> Result<Self> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| *dt as u8 == tag)
            .ok_or(ArrayError::UnknownDataType { tag })
    }
}

/// A primitive element type with a fixed external representation.
pub trait Element: Copy + PartialEq + Default + fmt::Debug + 'static {
    /// The data type tag of this element.
    const DATA_TYPE: DataType;

    /// Writes the element into `out` (at least `DATA_TYPE.size()` bytes).
    fn write<B: ByteOrder>(self, out: &mut [u8]);

    /// Reads an element from `buf` (at least `DATA_TYPE.size()` bytes).
    fn read<B: ByteOrder>(buf: &[u8]) -> Self;

    /// Wraps the element into a dynamically typed [`Value`].
    fn into_value(self) -> Value;

    /// Unwraps a [`Value`] of the matching type.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, |$w:ident, $o:ident| $write:expr, |$r:ident| $read:expr) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn write<B: ByteOrder>(self, $o: &mut [u8]) {
                let $w = self;
                $write
            }

            fn read<B: ByteOrder>($r: &[u8]) -> Self {
                $read
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(bool, Bool, |v, out| out[0] = u8::from(v), |buf| buf[0] != 0);
impl_element!(u8, UInt8, |v, out| out[0] = v, |buf| buf[0]);
impl_element!(i16, Int16, |v, out| B::write_i16(out, v), |buf| B::read_i16(buf));
impl_element!(u16, UInt16, |v, out| B::write_u16(out, v), |buf| B::read_u16(buf));
impl_element!(i32, Int32, |v, out| B::write_i32(out, v), |buf| B::read_i32(buf));
impl_element!(u32, UInt32, |v, out| B::write_u32(out, v), |buf| B::read_u32(buf));
impl_element!(i64, Int64, |v, out| B::write_i64(out, v), |buf| B::read_i64(buf));
impl_element!(f32, Float32, |v, out| B::write_f32(out, v), |buf| B::read_f32(buf));
impl_element!(f64, Float64, |v, out| B::write_f64(out, v), |buf| B::read_f64(buf));
impl_element!(
    Complex32,
    Complex32,
    |v, out| {
        B::write_f32(&mut out[0..4], v.re);
        B::write_f32(&mut out[4..8], v.im);
    },
    |buf| Complex::new(B::read_f32(&buf[0..4]), B::read_f32(&buf[4..8]))
);
impl_element!(
    Complex64,
    Complex64,
    |v, out| {
        B::write_f64(&mut out[0..8], v.re);
        B::write_f64(&mut out[8..16], v.im);
    },
    |buf| Complex::new(B::read_f64(&buf[0..8]), B::read_f64(&buf[8..16]))
);

/// A dynamically typed scalar cell value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Single precision float.
    Float32(f32),
    /// Double precision float.
    Float64(f64),
    /// Single precision complex.
    Complex32(Complex32),
    /// Double precision complex.
    Complex64(Complex64),
}

macro_rules! with_value {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            Value::Bool($v) => $body,
            Value::UInt8($v) => $body,
            Value::Int16($v) => $body,
            Value::UInt16($v) => $body,
            Value::Int32($v) => $body,
            Value::UInt32($v) => $body,
            Value::Int64($v) => $body,
            Value::Float32($v) => $body,
            Value::Float64($v) => $body,
            Value::Complex32($v) => $body,
            Value::Complex64($v) => $body,
        }
    };
}

impl Value {
    /// Returns the data type of this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        with_value!(*self, v => element_type(&v))
    }

    /// The zero ("default") value of a data type.
    #[must_use]
    pub fn zero(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => Value::Bool(false),
            DataType::UInt8 => Value::UInt8(0),
            DataType::Int16 => Value::Int16(0),
            DataType::UInt16 => Value::UInt16(0),
            DataType::Int32 => Value::Int32(0),
            DataType::UInt32 => Value::UInt32(0),
            DataType::Int64 => Value::Int64(0),
            DataType::Float32 => Value::Float32(0.0),
            DataType::Float64 => Value::Float64(0.0),
            DataType::Complex32 => Value::Complex32(Complex::default()),
            DataType::Complex64 => Value::Complex64(Complex::default()),
        }
    }

    /// Encodes the value into `out` using the given byte order.
    ///
    /// `out` must hold at least `self.data_type().size()` bytes.
    pub fn encode(&self, endian: Endian, out: &mut [u8]) {
        match endian {
            Endian::Big => with_value!(*self, v => v.write::<BigEndian>(out)),
            Endian::Little => with_value!(*self, v => v.write::<LittleEndian>(out)),
        }
    }

    /// Decodes a value of `data_type` from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::BufferTooShort`] if `buf` is smaller than the
    /// external size of `data_type`.
    pub fn decode(data_type: DataType, endian: Endian, buf: &[u8]) -> Result<Self> {
        if buf.len() < data_type.size() {
            return Err(ArrayError::BufferTooShort { needed: data_type.size(), found: buf.len() });
        }
        Ok(match endian {
            Endian::Big => decode_with::<BigEndian>(data_type, buf),
            Endian::Little => decode_with::<LittleEndian>(data_type, buf),
        })
    }
}

fn element_type<T: Element>(_: &T) -> DataType {
    T::DATA_TYPE
}

fn decode_with<B: ByteOrder>(data_type: DataType, buf: &[u8]) -> Value {
    match data_type {
        DataType::Bool => bool::read::<B>(buf).into_value(),
        DataType::UInt8 => u8::read::<B>(buf).into_value(),
        DataType::Int16 => i16::read::<B>(buf).into_value(),
        DataType::UInt16 => u16::read::<B>(buf).into_value(),
        DataType::Int32 => i32::read::<B>(buf).into_value(),
        DataType::UInt32 => u32::read::<B>(buf).into_value(),
        DataType::Int64 => i64::read::<B>(buf).into_value(),
        DataType::Float32 => f32::read::<B>(buf).into_value(),
        DataType::Float64 => f64::read::<B>(buf).into_value(),
        DataType::Complex32 => Complex32::read::<B>(buf).into_value(),
        DataType::Complex64 => Complex64::read::<B>(buf).into_value(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Complex32(c) => write!(f, "({}, {})", c.re, c.im),
            Value::Complex64(c) => write!(f, "({}, {})", c.re, c.im),
            Value::Bool(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    v.into_value()
                }
            }
        )*
    };
}

impl_from_for_value!(bool, u8, i16, u16, i32, u32, i64, f32, f64, Complex32, Complex64);
