//! Shared heap arrays: rows sharing one record, copy-on-write when one of
//! them is written, and reuse of slots freed when the last reference goes.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::path::Path;

use coltable_store::{ColumnDesc, Error, HeapFile, MemoryIo, Table, TableOptions};
use coltable_test_utils::TestDir;
use coltable_types::{
    ArrayValue, DataType, Endian, Shape, Slicer,
    config::{LockConfig, LockMode},
};

fn options() -> TableOptions {
    let lock = LockConfig::builder().mode(LockMode::NoLocking).build().unwrap();
    TableOptions::builder().lock(lock).build()
}

fn heap_len(table_dir: &Path) -> u64 {
    std::fs::metadata(table_dir.join("table.f0i")).unwrap().len()
}

fn ints(values: impl IntoIterator<Item = i32>) -> ArrayValue {
    ArrayValue::from_vec(values.into_iter().collect::<Vec<_>>())
}

#[test]
fn test_shared_cells_detach_on_write() {
    let dir = TestDir::new();
    let path = dir.join("shared.tab");
    let columns = [ColumnDesc::variable_array("data", DataType::Int32)];
    let original = ints(1..=8);
    {
        let mut table = Table::create(&path, &columns, options()).unwrap();
        table.add_row(4).unwrap();
        table.put_array("data", 0, &original).unwrap();
        table.flush(false).unwrap();
        let one_record = heap_len(&path);

        table.share_cell("data", 0, 1).unwrap();
        table.share_cell("data", 0, 2).unwrap();
        table.flush(false).unwrap();
        assert_eq!(heap_len(&path), one_record, "sharing allocates nothing");
        assert_eq!(table.get_array("data", 2).unwrap(), Some(original.clone()));
        table.set_shape("data", 2, original.shape()).unwrap();
        assert_eq!(table.get_array("data", 2).unwrap(), Some(original.clone()));

        table.put_slice("data", 1, &Slicer::new([0], [2]), &ints([100, 101])).unwrap();
        assert_eq!(table.get_array("data", 1).unwrap(), Some(ints([100, 101, 3, 4, 5, 6, 7, 8])));
        assert_eq!(table.get_array("data", 0).unwrap(), Some(original.clone()));
        assert_eq!(table.get_array("data", 2).unwrap(), Some(original.clone()));

        // Removing one sharer leaves the record to the other.
        table.remove_row(0).unwrap();
        assert_eq!(table.get_array("data", 1).unwrap(), Some(original.clone()));
        assert_eq!(table.get_array("data", 2).unwrap(), None);

        let err = table.share_cell("data", 2, 0).unwrap_err();
        assert!(matches!(err, Error::NoArray { row: 2, .. }), "got {err}");
        table.close().unwrap();
    }

    let mut table = Table::open(&path, options()).unwrap();
    assert_eq!(table.nrow(), 3);
    assert_eq!(table.get_array("data", 0).unwrap(), Some(ints([100, 101, 3, 4, 5, 6, 7, 8])));
    assert_eq!(table.get_array("data", 1).unwrap(), Some(original.clone()));

    // Growing row 1 frees its record; a same-sized array takes the slot.
    table.put_array("data", 1, &ints(0..32)).unwrap();
    table.flush(false).unwrap();
    let len = heap_len(&path);
    table.put_array("data", 2, &ints(10..18)).unwrap();
    table.flush(false).unwrap();
    assert_eq!(heap_len(&path), len);
    assert_eq!(table.get_array("data", 2).unwrap(), Some(ints(10..18)));
    assert_eq!(table.get_array("data", 1).unwrap(), Some(ints(0..32)));
}

#[test]
fn test_copy_cell_is_independent() {
    let dir = TestDir::new();
    let path = dir.join("copy.tab");
    let columns = [
        ColumnDesc::variable_array("data", DataType::Float64),
        ColumnDesc::fixed_array("fixed", DataType::Int16, [3]),
    ];
    let mut table = Table::create(&path, &columns, options()).unwrap();
    table.add_row(2).unwrap();
    let data = ArrayValue::new(Shape::new([2, 2]), vec![1.0_f64, 2.0, 3.0, 4.0]).unwrap();
    table.put_array("data", 0, &data).unwrap();
    table.put_array("fixed", 0, &ArrayValue::from_vec(vec![7_i16, 8, 9])).unwrap();

    table.copy_cell("data", 0, 1).unwrap();
    table.copy_cell("fixed", 0, 1).unwrap();
    table.put_slice("data", 1, &Slicer::new([0, 0], [1, 1]), &ArrayValue::from_vec(vec![-1.0_f64])).unwrap();
    table.put_array("fixed", 1, &ArrayValue::from_vec(vec![0_i16, 0, 0])).unwrap();

    assert_eq!(table.get_array("data", 0).unwrap(), Some(data));
    assert_eq!(table.get_array("fixed", 0).unwrap(), Some(ArrayValue::from_vec(vec![7_i16, 8, 9])));

    // Sharing a fixed-shape cell copies it.
    table.share_cell("fixed", 0, 1).unwrap();
    assert_eq!(table.get_array("fixed", 1).unwrap(), Some(ArrayValue::from_vec(vec![7_i16, 8, 9])));
}

#[test]
fn test_refcounts_free_and_reuse_slots() {
    let mut heap = HeapFile::create(Box::new(MemoryIo::new()), Endian::Big).unwrap();
    let shape = Shape::new([4]);
    let first = heap.put_shape(0, DataType::Int32, &shape).unwrap();
    heap.put_data(first, &ints([1, 2, 3, 4])).unwrap();

    assert_eq!(heap.increment_ref(first).unwrap(), 2);
    assert_eq!(heap.get_shape(first).unwrap().refcount, 2);

    // Keeping the shape keeps the shared record; reshaping detaches it and
    // leaves the other reference intact.
    assert_eq!(heap.put_shape(first, DataType::Int32, &shape).unwrap(), first);
    assert_eq!(heap.get_shape(first).unwrap().refcount, 2);
    let second = heap.put_shape(first, DataType::Int32, &Shape::new([3])).unwrap();
    assert_ne!(second, first);
    assert_eq!(heap.get_shape(first).unwrap().refcount, 1);
    assert_eq!(heap.get_data(first).unwrap(), ints([1, 2, 3, 4]));
    assert_eq!(heap.get_data(second).unwrap(), ints([0, 0, 0]));

    assert_eq!(heap.decrement_ref(first).unwrap(), 0);
    assert!(matches!(heap.get_shape(first).unwrap_err(), Error::NoHeapArray { .. }));
    assert_eq!(heap.free_slots().len(), 1);

    let end = heap.file_length();
    let third = heap.put_shape(0, DataType::Int32, &Shape::new([2])).unwrap();
    assert_eq!(third, first, "freed slot is reused");
    assert_eq!(heap.file_length(), end);
    assert!(heap.free_slots().is_empty());
}
