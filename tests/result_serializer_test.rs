//! Integration tests for result serialization
//!
//! These tests verify:
//! - Booleans are stored as marked 8-bit integers, never as 64-bit ones
//! - Strings become fixed-length byte strings of their encoded length
//! - Values without a result-file representation are rejected by kind
//! - Arrays keep their shape and big-endian row-major layout

use ndarray::{array, ArrayD, IxDyn};
use rust_daq_worker::data::{
    MemoryContainer, ResultSerializer, TypeCode, BOOL_MARKER, INT_MARKER,
};
use rust_daq_worker::dataset::MemoryDatasetDb;
use rust_daq_worker::{DaqError, DatasetScope, DatasetStore, DatasetValue};
use std::collections::BTreeMap;
use std::sync::Arc;

fn write(entries: Vec<(&str, DatasetValue)>) -> Result<MemoryContainer, DaqError> {
    let datasets: BTreeMap<String, DatasetValue> = entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    let mut container = MemoryContainer::new();
    ResultSerializer::write(&mut container, &datasets)?;
    Ok(container)
}

#[test]
fn test_bool_is_marked_int8() {
    let container = write(vec![("flag", DatasetValue::Bool(true))]).unwrap();
    let flag = container.dataset("flag").unwrap();

    assert_eq!(flag.type_code, TypeCode::I8Be);
    assert_eq!(flag.data, [1]);
    assert!(flag.is_scalar());
    assert_eq!(flag.attributes, [BOOL_MARKER]);
}

#[test]
fn test_native_int_is_marked_int64() {
    let container = write(vec![("n", DatasetValue::Int(-1))]).unwrap();
    let n = container.dataset("n").unwrap();

    assert_eq!(n.type_code, TypeCode::I64Be);
    assert_eq!(n.data, [0xff; 8]);
    assert_eq!(n.attributes, [INT_MARKER]);
}

#[test]
fn test_fixed_width_int64_has_no_marker() {
    let container = write(vec![("n", DatasetValue::I64(1))]).unwrap();
    let n = container.dataset("n").unwrap();
    assert_eq!(n.type_code, TypeCode::I64Be);
    assert!(n.attributes.is_empty());
}

#[test]
fn test_string_is_fixed_length() {
    let container = write(vec![("s", "abc".into()), ("empty", "".into())]).unwrap();

    let s = container.dataset("s").unwrap();
    assert_eq!(s.type_code, TypeCode::FixedString(3));
    assert_eq!(s.data, b"abc");
    assert_eq!(
        container.dataset("empty").unwrap().type_code,
        TypeCode::FixedString(0)
    );
}

#[test]
fn test_unsupported_kinds_are_named() {
    let cases = [
        (DatasetValue::List(vec![DatasetValue::Int(1)]), "list"),
        (DatasetValue::Map(BTreeMap::new()), "map"),
        (DatasetValue::None, "none"),
    ];
    for (value, kind) in cases {
        match write(vec![("x", value)]) {
            Err(DaqError::UnsupportedType(found)) => assert_eq!(found, kind),
            other => panic!("expected UnsupportedType({}), got {:?}", kind, other),
        }
    }
}

#[test]
fn test_matrix_keeps_shape_and_order() {
    let matrix: DatasetValue = array![[1u16, 2, 3], [4, 5, 6]].into_dyn().into();
    let container = write(vec![("m", matrix)]).unwrap();
    let m = container.dataset("m").unwrap();

    assert_eq!(m.type_code, TypeCode::U16Be);
    assert_eq!(m.shape, [2, 3]);
    assert_eq!(m.data, [0, 1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6]);
}

#[test]
fn test_transposed_array_written_in_logical_order() {
    let transposed = array![[1i8, 2], [3, 4]].reversed_axes().into_dyn();
    let container = write(vec![("t", transposed.into())]).unwrap();
    assert_eq!(container.dataset("t").unwrap().data, [1, 3, 2, 4]);
}

#[test]
fn test_zero_dimensional_array() {
    let scalar = ArrayD::from_elem(IxDyn(&[]), 1.0f32);
    let container = write(vec![("z", scalar.into())]).unwrap();
    let z = container.dataset("z").unwrap();
    assert_eq!(z.type_code, TypeCode::F32Be);
    assert!(z.is_scalar());
    assert_eq!(z.data, 1.0f32.to_be_bytes());
}

#[test]
fn test_store_writes_only_saved_datasets() {
    let mut store = DatasetStore::new(Arc::new(MemoryDatasetDb::new()));
    store
        .set("saved", DatasetValue::Bool(true), DatasetScope::Broadcast, true)
        .unwrap();
    store
        .set("live", DatasetValue::Int(3), DatasetScope::Broadcast, false)
        .unwrap();

    let mut container = MemoryContainer::new();
    store.write_results(&mut container).unwrap();

    assert_eq!(container.names().collect::<Vec<_>>(), ["saved"]);
}

#[test]
fn test_store_reports_unsupported_local_value() {
    let mut store = DatasetStore::new(Arc::new(MemoryDatasetDb::new()));
    store
        .set("a_ok", DatasetValue::U8(1), DatasetScope::Local, true)
        .unwrap();
    store
        .set("b_list", DatasetValue::List(Vec::new()), DatasetScope::Local, true)
        .unwrap();

    let mut container = MemoryContainer::new();
    let err = store.write_results(&mut container).unwrap_err();
    assert!(matches!(err, DaqError::UnsupportedType("list")));
    // Keys are written in order; the one before the failure is kept.
    assert_eq!(container.len(), 1);
}
