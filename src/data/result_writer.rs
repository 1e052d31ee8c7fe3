//! Result serialization: dataset values to typed result-file datasets.
//!
//! Every key of a run's local dataset mapping becomes one dataset. The type
//! mapping is fixed:
//!
//! | value            | type code            | attribute     |
//! |------------------|----------------------|---------------|
//! | `Bool`           | `I8Be`, 0 or 1       | `py_bool = 1` |
//! | `Int` (native)   | `I64Be`              | `py_int = 1`  |
//! | fixed-width      | matching `*Be` code  |               |
//! | `Array`          | element's `*Be` code, n-dimensional |  |
//! | `Str`            | `FixedString(bytes)` |               |
//!
//! Lists, maps and `None` are rejected with [`DaqError::UnsupportedType`].

use crate::dataset::value::{DatasetValue, ElementKind};
use crate::error::{AppResult, DaqError};
use std::collections::BTreeMap;
use tracing::debug;

/// Attribute marking an `I8Be` dataset that holds a boolean.
pub const BOOL_MARKER: &str = "py_bool";
/// Attribute marking an `I64Be` dataset that holds a native integer.
pub const INT_MARKER: &str = "py_int";

/// Stored type of a dataset. Numeric codes are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    /// 8-bit signed integer
    I8Be,
    /// 16-bit signed integer
    I16Be,
    /// 32-bit signed integer
    I32Be,
    /// 64-bit signed integer
    I64Be,
    /// 8-bit unsigned integer
    U8Be,
    /// 16-bit unsigned integer
    U16Be,
    /// 32-bit unsigned integer
    U32Be,
    /// 64-bit unsigned integer
    U64Be,
    /// IEEE half-precision float
    F16Be,
    /// IEEE single-precision float
    F32Be,
    /// IEEE double-precision float
    F64Be,
    /// Byte string of exactly this many bytes
    FixedString(usize),
}

impl TypeCode {
    /// Bytes per element.
    pub fn size(self) -> usize {
        match self {
            TypeCode::FixedString(len) => len,
            TypeCode::I8Be | TypeCode::U8Be => 1,
            TypeCode::I16Be | TypeCode::U16Be | TypeCode::F16Be => 2,
            TypeCode::I32Be | TypeCode::U32Be | TypeCode::F32Be => 4,
            TypeCode::I64Be | TypeCode::U64Be | TypeCode::F64Be => 8,
        }
    }
}

impl From<ElementKind> for TypeCode {
    fn from(kind: ElementKind) -> Self {
        match kind {
            ElementKind::I8 => TypeCode::I8Be,
            ElementKind::I16 => TypeCode::I16Be,
            ElementKind::I32 => TypeCode::I32Be,
            ElementKind::I64 => TypeCode::I64Be,
            ElementKind::U8 => TypeCode::U8Be,
            ElementKind::U16 => TypeCode::U16Be,
            ElementKind::U32 => TypeCode::U32Be,
            ElementKind::U64 => TypeCode::U64Be,
            ElementKind::F16 => TypeCode::F16Be,
            ElementKind::F32 => TypeCode::F32Be,
            ElementKind::F64 => TypeCode::F64Be,
        }
    }
}

/// A dataset ready to be written: type, shape, raw bytes and marker
/// attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDataset {
    /// Stored element type
    pub type_code: TypeCode,
    /// Empty for scalars
    pub shape: Vec<usize>,
    /// Row-major elements, big-endian
    pub data: Vec<u8>,
    /// Marker attributes, each stored as an `i8` valued 1
    pub attributes: Vec<&'static str>,
}

impl EncodedDataset {
    fn scalar(type_code: TypeCode, data: Vec<u8>) -> Self {
        Self {
            type_code,
            shape: Vec::new(),
            data,
            attributes: Vec::new(),
        }
    }

    fn with_marker(mut self, marker: &'static str) -> Self {
        self.attributes.push(marker);
        self
    }

    /// True for zero-dimensional datasets.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// True if `marker` is among the attributes.
    pub fn has_marker(&self, marker: &str) -> bool {
        self.attributes.iter().any(|attr| *attr == marker)
    }
}

/// Destination of encoded datasets, typically one result file.
pub trait ResultContainer {
    /// Store `dataset` under `name`. Existing names are an error.
    fn create_dataset(&mut self, name: &str, dataset: &EncodedDataset) -> AppResult<()>;
}

/// Container that keeps datasets in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    datasets: BTreeMap<String, EncodedDataset>,
}

impl MemoryContainer {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset stored under `name`.
    pub fn dataset(&self, name: &str) -> Option<&EncodedDataset> {
        self.datasets.get(name)
    }

    /// Dataset names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    /// Number of datasets.
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// True if no dataset was written.
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl ResultContainer for MemoryContainer {
    fn create_dataset(&mut self, name: &str, dataset: &EncodedDataset) -> AppResult<()> {
        if self.datasets.contains_key(name) {
            return Err(DaqError::Storage(format!("dataset '{}' already exists", name)));
        }
        self.datasets.insert(name.to_string(), dataset.clone());
        Ok(())
    }
}

/// Encodes dataset mappings into a [`ResultContainer`].
pub struct ResultSerializer;

impl ResultSerializer {
    /// Write one dataset per entry of `datasets` into `container`.
    ///
    /// Stops at the first value that cannot be encoded; datasets written
    /// before it stay in the container.
    pub fn write(
        container: &mut dyn ResultContainer,
        datasets: &BTreeMap<String, DatasetValue>,
    ) -> AppResult<()> {
        for (name, value) in datasets {
            let encoded = Self::encode(value)?;
            debug!(dataset = %name, type_code = ?encoded.type_code, "Writing result dataset");
            container.create_dataset(name, &encoded)?;
        }
        Ok(())
    }

    /// Encode a single value.
    pub fn encode(value: &DatasetValue) -> AppResult<EncodedDataset> {
        // Bool before Int: a boolean must never be stored as a 64-bit integer.
        match value {
            DatasetValue::Bool(flag) => {
                Ok(EncodedDataset::scalar(TypeCode::I8Be, vec![u8::from(*flag)])
                    .with_marker(BOOL_MARKER))
            }
            DatasetValue::Int(n) => Ok(EncodedDataset::scalar(
                TypeCode::I64Be,
                n.to_be_bytes().to_vec(),
            )
            .with_marker(INT_MARKER)),
            DatasetValue::Str(text) => {
                let bytes = text.as_bytes().to_vec();
                Ok(EncodedDataset::scalar(TypeCode::FixedString(bytes.len()), bytes))
            }
            DatasetValue::Array(arr) => Ok(EncodedDataset {
                type_code: arr.element_kind().into(),
                shape: arr.shape().to_vec(),
                data: arr.to_be_bytes(),
                attributes: Vec::new(),
            }),
            other => match other.fixed_width_be() {
                Some((kind, data)) => Ok(EncodedDataset::scalar(kind.into(), data)),
                None => Err(DaqError::UnsupportedType(other.kind_name())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_fixed_width_scalars() {
        let cases = [
            (DatasetValue::I8(-2), TypeCode::I8Be, vec![0xfe]),
            (DatasetValue::U16(0x0102), TypeCode::U16Be, vec![1, 2]),
            (DatasetValue::I32(-1), TypeCode::I32Be, vec![0xff; 4]),
            (
                DatasetValue::F16(f16::from_f32(1.0)),
                TypeCode::F16Be,
                vec![0x3c, 0x00],
            ),
            (
                DatasetValue::F64(1.0),
                TypeCode::F64Be,
                vec![0x3f, 0xf0, 0, 0, 0, 0, 0, 0],
            ),
        ];
        for (value, type_code, data) in cases {
            let encoded = ResultSerializer::encode(&value).unwrap();
            assert_eq!(encoded.type_code, type_code);
            assert_eq!(encoded.data, data);
            assert!(encoded.attributes.is_empty());
            assert!(encoded.is_scalar());
        }
    }

    #[test]
    fn test_native_int_marked() {
        let encoded = ResultSerializer::encode(&DatasetValue::Int(258)).unwrap();
        assert_eq!(encoded.type_code, TypeCode::I64Be);
        assert_eq!(encoded.data, [0, 0, 0, 0, 0, 0, 1, 2]);
        assert!(encoded.has_marker(INT_MARKER));
        assert!(!encoded.has_marker(BOOL_MARKER));
    }

    #[test]
    fn test_false_is_zero_byte() {
        let encoded = ResultSerializer::encode(&DatasetValue::Bool(false)).unwrap();
        assert_eq!(encoded.data, [0]);
        assert!(encoded.has_marker(BOOL_MARKER));
    }

    #[test]
    fn test_string_length_is_byte_length() {
        let encoded = ResultSerializer::encode(&DatasetValue::Str("µs".into())).unwrap();
        assert_eq!(encoded.type_code, TypeCode::FixedString(3));
        assert_eq!(encoded.data, "µs".as_bytes());
    }

    #[test]
    fn test_duplicate_dataset_rejected_by_memory_container() {
        let mut container = MemoryContainer::new();
        let encoded = ResultSerializer::encode(&DatasetValue::U8(1)).unwrap();
        container.create_dataset("a", &encoded).unwrap();
        assert!(matches!(
            container.create_dataset("a", &encoded),
            Err(DaqError::Storage(_))
        ));
    }
}
