//! Property tests: everything written to a table reads back identically
//! after the table is closed and reopened, for every data type and both
//! byte orders.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use coltable_store::{ColumnDesc, Table, TableOptions};
use coltable_test_utils::{
    TestDir,
    strategies::{RowOp, arb_array_of, arb_array_with_shape, arb_data_type, arb_row_ops, arb_shape, arb_value_of},
};
use coltable_types::{
    ArrayValue, DataType, Endian, Shape, Value,
    config::{LockConfig, LockMode, StorageConfig},
};
use proptest::{collection::vec, option, prelude::*};

#[derive(Debug, Clone)]
struct Contents {
    data_type: DataType,
    shape: Shape,
    scalars: Vec<Value>,
    fixed: Vec<ArrayValue>,
    variable: Vec<Option<ArrayValue>>,
    byte_order: Endian,
}

fn arb_contents() -> impl Strategy<Value = Contents> {
    (arb_data_type(), arb_shape(2, 4), 1usize..8, prop::bool::ANY).prop_flat_map(|(data_type, shape, nrows, big)| {
        (
            vec(arb_value_of(data_type), nrows),
            vec(arb_array_with_shape(data_type, shape.clone()), nrows),
            vec(option::of(arb_array_of(data_type, 3, 5)), nrows),
        )
            .prop_map(move |(scalars, fixed, variable)| Contents {
                data_type,
                shape: shape.clone(),
                scalars,
                fixed,
                variable,
                byte_order: if big { Endian::Big } else { Endian::Little },
            })
    })
}

fn options(byte_order: Endian) -> TableOptions {
    let storage = StorageConfig::builder().bucket_size(512).cache_size(2).byte_order(byte_order).build().unwrap();
    let lock = LockConfig::builder().mode(LockMode::NoLocking).build().unwrap();
    TableOptions::builder().storage(storage).lock(lock).build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn values_survive_reopen(contents in arb_contents()) {
        let dir = TestDir::new();
        let path = dir.join("round_trip.tab");
        let columns = [
            ColumnDesc::scalar("scalar", contents.data_type),
            ColumnDesc::fixed_array("fixed", contents.data_type, contents.shape.clone()),
            ColumnDesc::variable_array("variable", contents.data_type),
        ];
        let nrows = contents.scalars.len() as u64;
        {
            let mut table = Table::create(&path, &columns, options(contents.byte_order)).unwrap();
            table.add_row(nrows).unwrap();
            for row in 0..nrows {
                let i = row as usize;
                table.put_scalar("scalar", row, &contents.scalars[i]).unwrap();
                table.put_array("fixed", row, &contents.fixed[i]).unwrap();
                if let Some(array) = &contents.variable[i] {
                    table.put_array("variable", row, array).unwrap();
                }
            }
            table.close().unwrap();
        }

        let mut table = Table::open(&path, options(Endian::native())).unwrap();
        prop_assert_eq!(table.nrow(), nrows);
        prop_assert_eq!(table.get_column("scalar").unwrap(), contents.scalars.clone());
        for row in 0..nrows {
            let i = row as usize;
            prop_assert_eq!(table.get_array("fixed", row).unwrap(), Some(contents.fixed[i].clone()));
            prop_assert_eq!(table.get_array("variable", row).unwrap(), contents.variable[i].clone());
        }
    }

    #[test]
    fn row_changes_keep_values_aligned(ops in arb_row_ops(12, 5)) {
        let dir = TestDir::new();
        let path = dir.join("rows.tab");
        let columns = [
            ColumnDesc::scalar("tag", DataType::Int64),
            ColumnDesc::variable_array("payload", DataType::Int64),
        ];
        let mut table = Table::create(&path, &columns, options(Endian::Big)).unwrap();
        let mut model: Vec<i64> = Vec::new();
        let mut next_tag = 0i64;
        for op in ops {
            match op {
                RowOp::Add(count) => {
                    let first = table.nrow();
                    table.add_row(count).unwrap();
                    for row in first..first + count {
                        table.put("tag", row, next_tag).unwrap();
                        table.put_array("payload", row, &ArrayValue::from_vec(vec![next_tag; (next_tag % 3 + 1) as usize])).unwrap();
                        model.push(next_tag);
                        next_tag += 1;
                    }
                },
                RowOp::Remove(position) if !model.is_empty() => {
                    let row = position % model.len() as u64;
                    table.remove_row(row).unwrap();
                    model.remove(row as usize);
                },
                RowOp::Remove(_) => {},
            }
        }
        table.close().unwrap();

        let mut table = Table::open(&path, options(Endian::Big)).unwrap();
        prop_assert_eq!(table.nrow(), model.len() as u64);
        for (row, tag) in model.iter().enumerate() {
            prop_assert_eq!(table.get::<i64>("tag", row as u64).unwrap(), *tag);
            let payload = table.get_array("payload", row as u64).unwrap().unwrap();
            prop_assert_eq!(payload, ArrayValue::from_vec(vec![*tag; (*tag % 3 + 1) as usize]));
        }
    }
}
