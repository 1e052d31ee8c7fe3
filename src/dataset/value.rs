//! Dataset values and in-place indexing.
//!
//! `DatasetValue` covers everything an experiment may store as a dataset.
//! Only the scalar, string and array kinds have a result-file
//! representation; lists, maps and `None` are valid while a run executes but
//! are rejected by the result serializer.

use crate::error::{AppResult, DaqError};
use half::f16;
use ndarray::{ArrayD, Axis, Slice};
use std::collections::BTreeMap;
use std::ops::Range;

/// A dataset value.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetValue {
    /// No value
    None,
    /// Boolean
    Bool(bool),
    /// Native integer of unspecified width
    Int(i64),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 8-bit unsigned integer
    U8(u8),
    /// 16-bit unsigned integer
    U16(u16),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit unsigned integer
    U64(u64),
    /// Half-precision float
    F16(f16),
    /// Single-precision float
    F32(f32),
    /// Double-precision float
    F64(f64),
    /// UTF-8 text
    Str(String),
    /// N-dimensional array
    Array(ArrayValue),
    /// Ordered sequence of values
    List(Vec<DatasetValue>),
    /// String-keyed mapping
    Map(BTreeMap<String, DatasetValue>),
}

/// Element type of an [`ArrayValue`] or fixed-width scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f16`
    F16,
    /// `f32`
    F32,
    /// `f64`
    F64,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 | ElementKind::F16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 => 8,
        }
    }
}

/// N-dimensional array with a fixed-width element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// `i8` elements
    I8(ArrayD<i8>),
    /// `i16` elements
    I16(ArrayD<i16>),
    /// `i32` elements
    I32(ArrayD<i32>),
    /// `i64` elements
    I64(ArrayD<i64>),
    /// `u8` elements
    U8(ArrayD<u8>),
    /// `u16` elements
    U16(ArrayD<u16>),
    /// `u32` elements
    U32(ArrayD<u32>),
    /// `u64` elements
    U64(ArrayD<u64>),
    /// `f16` elements
    F16(ArrayD<f16>),
    /// `f32` elements
    F32(ArrayD<f32>),
    /// `f64` elements
    F64(ArrayD<f64>),
}

macro_rules! each_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            ArrayValue::I8($arr) => $body,
            ArrayValue::I16($arr) => $body,
            ArrayValue::I32($arr) => $body,
            ArrayValue::I64($arr) => $body,
            ArrayValue::U8($arr) => $body,
            ArrayValue::U16($arr) => $body,
            ArrayValue::U32($arr) => $body,
            ArrayValue::U64($arr) => $body,
            ArrayValue::F16($arr) => $body,
            ArrayValue::F32($arr) => $body,
            ArrayValue::F64($arr) => $body,
        }
    };
}

/// Fixed-width element types that can live in an [`ArrayValue`].
trait Element: Copy {
    const KIND: ElementKind;
    const NAME: &'static str;

    fn from_scalar(value: &DatasetValue) -> Option<Self>;
    fn from_array(value: &DatasetValue) -> Option<&ArrayD<Self>>;
    fn extend_be(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($($variant:ident: $ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: ElementKind = ElementKind::$variant;
                const NAME: &'static str = $name;

                fn from_scalar(value: &DatasetValue) -> Option<Self> {
                    match value {
                        DatasetValue::$variant(x) => Some(*x),
                        _ => None,
                    }
                }

                fn from_array(value: &DatasetValue) -> Option<&ArrayD<Self>> {
                    match value {
                        DatasetValue::Array(ArrayValue::$variant(arr)) => Some(arr),
                        _ => None,
                    }
                }

                fn extend_be(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }
            }

            impl From<$ty> for DatasetValue {
                fn from(value: $ty) -> Self {
                    DatasetValue::$variant(value)
                }
            }

            impl From<ArrayD<$ty>> for ArrayValue {
                fn from(arr: ArrayD<$ty>) -> Self {
                    ArrayValue::$variant(arr)
                }
            }

            impl From<ArrayD<$ty>> for DatasetValue {
                fn from(arr: ArrayD<$ty>) -> Self {
                    DatasetValue::Array(ArrayValue::$variant(arr))
                }
            }
        )*
    };
}

impl_element! {
    I8: i8 => "int8",
    I16: i16 => "int16",
    I32: i32 => "int32",
    I64: i64 => "int64",
    U8: u8 => "uint8",
    U16: u16 => "uint16",
    U32: u32 => "uint32",
    U64: u64 => "uint64",
    F16: f16 => "float16",
    F32: f32 => "float32",
    F64: f64 => "float64",
}

impl From<bool> for DatasetValue {
    fn from(value: bool) -> Self {
        DatasetValue::Bool(value)
    }
}

impl From<&str> for DatasetValue {
    fn from(value: &str) -> Self {
        DatasetValue::Str(value.to_string())
    }
}

impl From<String> for DatasetValue {
    fn from(value: String) -> Self {
        DatasetValue::Str(value)
    }
}

impl From<Vec<DatasetValue>> for DatasetValue {
    fn from(items: Vec<DatasetValue>) -> Self {
        DatasetValue::List(items)
    }
}

impl From<ArrayValue> for DatasetValue {
    fn from(arr: ArrayValue) -> Self {
        DatasetValue::Array(arr)
    }
}

/// Position inside a dataset value for [`DatasetValue::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetIndex {
    /// One index per array dimension, or successive positions into nested lists
    Element(Vec<usize>),
    /// Sub-range along the first axis
    Range(Range<usize>),
    /// Entry of a map value
    Key(String),
}

impl From<usize> for DatasetIndex {
    fn from(index: usize) -> Self {
        DatasetIndex::Element(vec![index])
    }
}

impl From<Range<usize>> for DatasetIndex {
    fn from(range: Range<usize>) -> Self {
        DatasetIndex::Range(range)
    }
}

impl DatasetValue {
    /// Name of the value's kind, as used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DatasetValue::None => "none",
            DatasetValue::Bool(_) => "bool",
            DatasetValue::Int(_) => "int",
            DatasetValue::I8(_) => i8::NAME,
            DatasetValue::I16(_) => i16::NAME,
            DatasetValue::I32(_) => i32::NAME,
            DatasetValue::I64(_) => i64::NAME,
            DatasetValue::U8(_) => u8::NAME,
            DatasetValue::U16(_) => u16::NAME,
            DatasetValue::U32(_) => u32::NAME,
            DatasetValue::U64(_) => u64::NAME,
            DatasetValue::F16(_) => f16::NAME,
            DatasetValue::F32(_) => f32::NAME,
            DatasetValue::F64(_) => f64::NAME,
            DatasetValue::Str(_) => "str",
            DatasetValue::Array(_) => "array",
            DatasetValue::List(_) => "list",
            DatasetValue::Map(_) => "map",
        }
    }

    /// Element kind and big-endian bytes of a fixed-width scalar.
    ///
    /// `None` for every other kind, including `Bool` and the native `Int`.
    pub fn fixed_width_be(&self) -> Option<(ElementKind, Vec<u8>)> {
        fn encode<T: Element>(x: T) -> Option<(ElementKind, Vec<u8>)> {
            let mut out = Vec::with_capacity(T::KIND.size());
            x.extend_be(&mut out);
            Some((T::KIND, out))
        }

        match *self {
            DatasetValue::I8(x) => encode(x),
            DatasetValue::I16(x) => encode(x),
            DatasetValue::I32(x) => encode(x),
            DatasetValue::I64(x) => encode(x),
            DatasetValue::U8(x) => encode(x),
            DatasetValue::U16(x) => encode(x),
            DatasetValue::U32(x) => encode(x),
            DatasetValue::U64(x) => encode(x),
            DatasetValue::F16(x) => encode(x),
            DatasetValue::F32(x) => encode(x),
            DatasetValue::F64(x) => encode(x),
            _ => None,
        }
    }

    /// Write `value` at `index` inside this value.
    ///
    /// Nothing is modified when an error is returned.
    pub fn assign(&mut self, index: &DatasetIndex, value: DatasetValue) -> AppResult<()> {
        match self {
            DatasetValue::Array(arr) => arr.assign(index, &value),
            DatasetValue::List(items) => assign_list(items, index, value),
            DatasetValue::Map(entries) => match index {
                DatasetIndex::Key(key) => {
                    entries.insert(key.clone(), value);
                    Ok(())
                }
                other => Err(DaqError::InvalidIndex(format!(
                    "map values are indexed by key, not {:?}",
                    other
                ))),
            },
            scalar => Err(DaqError::InvalidIndex(format!(
                "{} values do not support item assignment",
                scalar.kind_name()
            ))),
        }
    }
}

fn assign_list(
    items: &mut Vec<DatasetValue>,
    index: &DatasetIndex,
    value: DatasetValue,
) -> AppResult<()> {
    match index {
        DatasetIndex::Element(path) => {
            let (&first, rest) = path
                .split_first()
                .ok_or_else(|| DaqError::InvalidIndex("empty element index".into()))?;
            let len = items.len();
            let slot = items.get_mut(first).ok_or_else(|| {
                DaqError::InvalidIndex(format!("index {} out of range for list of {}", first, len))
            })?;
            if rest.is_empty() {
                *slot = value;
                Ok(())
            } else {
                slot.assign(&DatasetIndex::Element(rest.to_vec()), value)
            }
        }
        DatasetIndex::Range(range) => {
            check_range(range, items.len())?;
            match value {
                DatasetValue::List(replacement) => {
                    items.splice(range.clone(), replacement);
                    Ok(())
                }
                other => Err(DaqError::TypeMismatch {
                    expected: "list",
                    found: other.kind_name(),
                }),
            }
        }
        DatasetIndex::Key(key) => Err(DaqError::InvalidIndex(format!(
            "lists cannot be indexed by key '{}'",
            key
        ))),
    }
}

fn check_range(range: &Range<usize>, len: usize) -> AppResult<()> {
    if range.start > range.end || range.end > len {
        return Err(DaqError::InvalidIndex(format!(
            "range {:?} out of bounds for length {}",
            range, len
        )));
    }
    Ok(())
}

impl ArrayValue {
    /// Element type of the array.
    pub fn element_kind(&self) -> ElementKind {
        match self {
            ArrayValue::I8(_) => ElementKind::I8,
            ArrayValue::I16(_) => ElementKind::I16,
            ArrayValue::I32(_) => ElementKind::I32,
            ArrayValue::I64(_) => ElementKind::I64,
            ArrayValue::U8(_) => ElementKind::U8,
            ArrayValue::U16(_) => ElementKind::U16,
            ArrayValue::U32(_) => ElementKind::U32,
            ArrayValue::U64(_) => ElementKind::U64,
            ArrayValue::F16(_) => ElementKind::F16,
            ArrayValue::F32(_) => ElementKind::F32,
            ArrayValue::F64(_) => ElementKind::F64,
        }
    }

    /// Length of each axis.
    pub fn shape(&self) -> &[usize] {
        each_array!(self, arr => arr.shape())
    }

    /// Elements in logical row-major order, each big-endian.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        each_array!(self, arr => {
            let mut out = Vec::with_capacity(arr.len() * self.element_kind().size());
            for &x in arr.iter() {
                x.extend_be(&mut out);
            }
            out
        })
    }

    fn assign(&mut self, index: &DatasetIndex, value: &DatasetValue) -> AppResult<()> {
        each_array!(self, arr => assign_array(arr, index, value))
    }
}

fn assign_array<T: Element>(
    arr: &mut ArrayD<T>,
    index: &DatasetIndex,
    value: &DatasetValue,
) -> AppResult<()> {
    let mismatch = || DaqError::TypeMismatch {
        expected: T::NAME,
        found: value.kind_name(),
    };

    match index {
        DatasetIndex::Element(path) => {
            let x = T::from_scalar(value).ok_or_else(mismatch)?;
            if path.len() != arr.ndim() {
                return Err(DaqError::InvalidIndex(format!(
                    "{}-dimensional index for {}-dimensional array",
                    path.len(),
                    arr.ndim()
                )));
            }
            let shape = arr.shape().to_vec();
            let slot = arr.get_mut(path.as_slice()).ok_or_else(|| {
                DaqError::InvalidIndex(format!(
                    "index {:?} out of bounds for shape {:?}",
                    path, shape
                ))
            })?;
            *slot = x;
            Ok(())
        }
        DatasetIndex::Range(range) => {
            if arr.ndim() == 0 {
                return Err(DaqError::InvalidIndex(
                    "cannot take a range of a 0-dimensional array".into(),
                ));
            }
            check_range(range, arr.len_of(Axis(0)))?;
            let mut view = arr.slice_axis_mut(Axis(0), Slice::from(range.clone()));
            if let Some(x) = T::from_scalar(value) {
                view.fill(x);
                return Ok(());
            }
            let source = T::from_array(value).ok_or_else(mismatch)?;
            if source.shape() != view.shape() {
                return Err(DaqError::InvalidIndex(format!(
                    "cannot assign shape {:?} to range of shape {:?}",
                    source.shape(),
                    view.shape()
                )));
            }
            view.assign(source);
            Ok(())
        }
        DatasetIndex::Key(key) => Err(DaqError::InvalidIndex(format!(
            "arrays cannot be indexed by key '{}'",
            key
        ))),
    }
}
