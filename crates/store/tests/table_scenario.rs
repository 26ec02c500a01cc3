//! End-to-end table scenarios.
//!
//! These tests drive a table through its public API the way an application
//! would: create, add rows, write fixed and variable-shape arrays, close,
//! and reopen. They cover:
//!
//! - Fixed-shape columns rejecting other shapes without writing anything
//! - Variable-shape cells growing and shrinking, with heap storage reused
//! - Every value surviving a close/reopen cycle

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::path::Path;

use coltable_store::{ColumnDesc, Error, Table, TableOptions};
use coltable_test_utils::TestDir;
use coltable_types::{
    ArrayValue, DataType, Shape, Slicer, Value,
    config::{LockConfig, LockMode, StorageConfig},
};

fn options(mode: LockMode) -> TableOptions {
    let storage = StorageConfig::builder().bucket_size(512).cache_size(4).build().unwrap();
    let lock = LockConfig::builder().mode(mode).build().unwrap();
    TableOptions::builder().storage(storage).lock(lock).build()
}

fn heap_len(table_dir: &Path) -> u64 {
    std::fs::metadata(table_dir.join("table.f0i")).unwrap().len()
}

fn ints(values: &[i32]) -> ArrayValue {
    ArrayValue::from_vec(values.to_vec())
}

fn doubles(values: &[f64]) -> ArrayValue {
    ArrayValue::from_vec(values.to_vec())
}

#[test]
fn test_fixed_and_variable_columns_survive_reopen() {
    let dir = TestDir::new();
    let path = dir.join("scenario.tab");
    let columns = [
        ColumnDesc::fixed_array("ints", DataType::Int32, [4]),
        ColumnDesc::variable_array("doubles", DataType::Float64),
    ];

    {
        let mut table = Table::create(&path, &columns, options(LockMode::Permanent)).unwrap();
        assert_eq!(table.nrow(), 0);
        table.add_row(3).unwrap();

        table.put_array("ints", 0, &ints(&[1, 2, 3, 4])).unwrap();
        let err = table.put_array("ints", 1, &ints(&[1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { row: 1, .. }), "got {err}");
        assert!(err.is_checked());
        assert!(!table.is_defined("ints", 1).unwrap());

        let long: Vec<f64> = (0..10).map(f64::from).collect();
        table.put_array("doubles", 0, &doubles(&long)).unwrap();
        table.flush(false).unwrap();
        let len_after_long = heap_len(&path);

        table.set_shape("doubles", 0, &Shape::new([2])).unwrap();
        table.put_array("doubles", 0, &doubles(&[0.5, -0.5])).unwrap();
        assert_eq!(table.get_array("doubles", 0).unwrap(), Some(doubles(&[0.5, -0.5])));
        table.flush(false).unwrap();
        assert_eq!(heap_len(&path), len_after_long, "shrinking reuses the slot");

        // The slot still has room for the original length.
        table.put_array("doubles", 0, &doubles(&long)).unwrap();
        table.put_array("doubles", 0, &doubles(&[0.5, -0.5])).unwrap();
        table.flush(false).unwrap();
        assert_eq!(heap_len(&path), len_after_long);

        table.close().unwrap();
    }

    let mut table = Table::open(&path, options(LockMode::Permanent)).unwrap();
    assert_eq!(table.nrow(), 3);
    assert_eq!(table.get_array("ints", 0).unwrap(), Some(ints(&[1, 2, 3, 4])));
    assert_eq!(table.get_array("ints", 1).unwrap(), None);
    assert_eq!(table.get_array("ints", 2).unwrap(), None);
    assert_eq!(table.get_array("doubles", 0).unwrap(), Some(doubles(&[0.5, -0.5])));
    assert_eq!(table.shape("doubles", 0).unwrap(), Some(Shape::new([2])));
    assert_eq!(table.get_array("doubles", 1).unwrap(), None);
}

#[test]
fn test_fixed_shape_rejection_leaves_cell_untouched() {
    let dir = TestDir::new();
    let path = dir.join("fixed.tab");
    let columns = [ColumnDesc::fixed_array("ints", DataType::Int32, [2, 2])];
    let mut table = Table::create(&path, &columns, options(LockMode::NoLocking)).unwrap();
    table.add_row(2).unwrap();
    let original = ArrayValue::new(Shape::new([2, 2]), vec![1_i32, 2, 3, 4]).unwrap();
    table.put_array("ints", 0, &original).unwrap();

    let wrong_shape = ArrayValue::new(Shape::new([4]), vec![9_i32, 9, 9, 9]).unwrap();
    assert!(matches!(table.put_array("ints", 0, &wrong_shape).unwrap_err(), Error::ShapeMismatch { .. }));

    let wrong_type = ArrayValue::new(Shape::new([2, 2]), vec![9.0_f64; 4]).unwrap();
    assert!(table.put_array("ints", 0, &wrong_type).unwrap_err().is_checked());

    let err = table.set_shape("ints", 1, &Shape::new([3, 3])).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { row: 1, .. }));
    assert!(!table.is_defined("ints", 1).unwrap());

    let outside = Slicer::new([1, 1], [2, 1]);
    let section = ArrayValue::new(Shape::new([2, 1]), vec![7_i32, 7]).unwrap();
    assert!(table.put_slice("ints", 0, &outside, &section).unwrap_err().is_checked());

    assert!(matches!(table.put_array("ints", 2, &original).unwrap_err(), Error::RowOutOfRange { row: 2, nrows: 2 }));
    assert_eq!(table.get_array("ints", 0).unwrap(), Some(original));
}

#[test]
fn test_variable_array_grow_shrink_and_slices() {
    let dir = TestDir::new();
    let path = dir.join("variable.tab");
    let columns = [
        ColumnDesc::scalar("id", DataType::Int64),
        ColumnDesc::variable_array("data", DataType::Int32).with_ndim(2),
    ];
    {
        let mut table = Table::create(&path, &columns, options(LockMode::NoLocking)).unwrap();
        table.add_row(2).unwrap();
        let neighbour = ArrayValue::new(Shape::new([1, 1]), vec![-1_i32]).unwrap();
        table.put_array("data", 1, &neighbour).unwrap();

        let small = ArrayValue::new(Shape::new([2, 3]), (0..6).collect::<Vec<i32>>()).unwrap();
        table.put_array("data", 0, &small).unwrap();
        assert_eq!(table.get_array("data", 0).unwrap(), Some(small));

        let grown = ArrayValue::new(Shape::new([4, 5]), (0..20).collect::<Vec<i32>>()).unwrap();
        table.put_array("data", 0, &grown).unwrap();
        assert_eq!(table.get_array("data", 0).unwrap(), Some(grown));
        assert_eq!(table.get_array("data", 1).unwrap(), Some(neighbour.clone()));

        // Column-major: element (i, j) sits at i + 4 * j.
        let slicer = Slicer::new([1, 1], [2, 2]);
        let section = table.get_slice("data", 0, &slicer).unwrap();
        assert_eq!(section, ArrayValue::new(Shape::new([2, 2]), vec![5_i32, 6, 9, 10]).unwrap());

        let patch = ArrayValue::new(Shape::new([2, 2]), vec![0_i32; 4]).unwrap();
        table.put_slice("data", 0, &slicer, &patch).unwrap();
        assert_eq!(table.get_slice("data", 0, &slicer).unwrap(), patch);

        let wrong_ndim = ArrayValue::from_vec(vec![1_i32, 2, 3]);
        assert!(matches!(table.put_array("data", 0, &wrong_ndim).unwrap_err(), Error::ShapeMismatch { .. }));

        table.set_shape("data", 0, &Shape::new([1, 2])).unwrap();
        assert_eq!(table.get_array("data", 0).unwrap(), Some(ArrayValue::zeros(DataType::Int32, Shape::new([1, 2]))));
        table.put("id", 1, 99_i64).unwrap();
    }

    let mut table = Table::open(&path, options(LockMode::NoLocking)).unwrap();
    assert_eq!(table.shape("data", 0).unwrap(), Some(Shape::new([1, 2])));
    assert_eq!(table.get_array("data", 1).unwrap(), Some(ArrayValue::new(Shape::new([1, 1]), vec![-1_i32]).unwrap()));
    assert_eq!(table.get::<i64>("id", 1).unwrap(), 99);
}

#[test]
fn test_rows_and_columns_through_multiple_managers() {
    let dir = TestDir::new();
    let path = dir.join("managers.tab");
    let columns = [
        ColumnDesc::scalar("time", DataType::Float64),
        ColumnDesc::scalar("scratch", DataType::Int32).bind("MemoryStMan", "scratch"),
        ColumnDesc::fixed_array("uvw", DataType::Float64, [3]).bind("StandardStMan", "uvw"),
    ];
    let mut table = Table::create(&path, &columns, options(LockMode::NoLocking)).unwrap();
    table.add_row(4).unwrap();
    for row in 0..4 {
        table.put("time", row, row as f64 * 10.0).unwrap();
        table.put("scratch", row, row as i32).unwrap();
        table.put_array("uvw", row, &doubles(&[row as f64, 0.0, -(row as f64)])).unwrap();
    }

    table.remove_row(1).unwrap();
    assert_eq!(table.nrow(), 3);
    assert_eq!(table.get::<f64>("time", 1).unwrap(), 20.0);
    assert_eq!(table.get::<i32>("scratch", 1).unwrap(), 2);
    assert_eq!(table.get_array("uvw", 2).unwrap(), Some(doubles(&[3.0, 0.0, -3.0])));

    // A column too wide for the spare bytes of its index forces a rearrangement.
    table.add_column(&ColumnDesc::fixed_array("flags", DataType::Bool, [64])).unwrap();
    assert_eq!(table.get::<f64>("time", 2).unwrap(), 30.0);
    assert!(!table.is_defined("flags", 0).unwrap());

    table.remove_columns(&["uvw"]).unwrap();
    assert!(path.join("table.f2").exists(), "files stay until the metadata drops the manager");
    table.flush(false).unwrap();
    assert!(!path.join("table.f2").exists(), "manager without columns is dropped");
    let reopened = Table::open(&path, options(LockMode::NoLocking).read_only()).unwrap();
    assert!(reopened.column_desc("uvw").is_err());
    drop(reopened);
    let names: Vec<&str> = table.column_names().collect();
    assert_eq!(names, ["time", "scratch", "flags"]);
    assert_eq!(table.cache_stats().len(), 1);
}

#[test]
fn test_column_write_with_mistyped_value_changes_nothing() {
    let dir = TestDir::new();
    let path = dir.join("column.tab");
    let columns = [ColumnDesc::scalar("a", DataType::Int32)];
    let mut table = Table::create(&path, &columns, options(LockMode::NoLocking)).unwrap();
    table.add_row(3).unwrap();
    let before = table.modify_count();

    let mixed = [Value::Int32(7), Value::Int32(8), Value::Float64(1.0)];
    let err = table.put_column("a", &mixed).unwrap_err();
    assert!(matches!(err, Error::ColumnTypeMismatch { found: DataType::Float64, .. }), "got {err}");
    assert_eq!(table.get_column("a").unwrap(), vec![Value::Int32(0); 3]);
    assert_eq!(table.modify_count(), before);

    let short = [Value::Int32(1)];
    assert!(matches!(table.put_column("a", &short).unwrap_err(), Error::RowOutOfRange { row: 1, nrows: 3 }));

    let values = [Value::Int32(7), Value::Int32(8), Value::Int32(9)];
    table.put_column("a", &values).unwrap();
    assert_eq!(table.get_column("a").unwrap(), values);
}
