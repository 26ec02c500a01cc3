//! In-memory storage manager.
//!
//! Holds its columns in plain vectors and never touches disk: the data
//! lives as long as the table handle. Array cells are reference-counted so
//! [`share_cell`](StorageManager::share_cell) is a pointer copy; writing a
//! shared array detaches it first.

use std::sync::Arc;

use coltable_types::{ArrayValue, Shape, Slicer, Value};

use super::{StManContext, StorageManager, check_row};
use crate::{
    column::{ColumnDesc, ColumnKind},
    error::{Error, Result, RowId},
};

#[derive(Debug, Clone)]
enum Cells {
    Scalar(Vec<Value>),
    Array(Vec<Option<Arc<ArrayValue>>>),
}

#[derive(Debug, Clone)]
struct MemColumn {
    desc: ColumnDesc,
    cells: Cells,
}

impl MemColumn {
    fn new(desc: &ColumnDesc, nrows: u64) -> Self {
        let cells = match desc.kind {
            ColumnKind::Scalar => Cells::Scalar(vec![Value::zero(desc.data_type); nrows as usize]),
            _ => Cells::Array(vec![None; nrows as usize]),
        };
        Self { desc: desc.clone(), cells }
    }

    fn scalars(&mut self) -> Result<&mut Vec<Value>> {
        match &mut self.cells {
            Cells::Scalar(values) => Ok(values),
            Cells::Array(_) => {
                Err(Error::UnsupportedOperation { column: self.desc.name.clone(), operation: "scalars" })
            },
        }
    }

    fn arrays(&mut self) -> Result<&mut Vec<Option<Arc<ArrayValue>>>> {
        match &mut self.cells {
            Cells::Array(arrays) => Ok(arrays),
            Cells::Scalar(_) => {
                Err(Error::UnsupportedOperation { column: self.desc.name.clone(), operation: "arrays" })
            },
        }
    }
}

/// Storage manager keeping all data in memory.
#[derive(Debug)]
pub struct MemoryStMan {
    name: String,
    nrows: u64,
    columns: Vec<MemColumn>,
    change_count: u64,
}

impl MemoryStMan {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "MemoryStMan";

    /// Creates a manager with `nrows` rows of `columns`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidColumn`] or [`Error::ColumnExists`] for bad
    /// column descriptions.
    pub fn create(name: impl Into<String>, nrows: u64, columns: &[ColumnDesc]) -> Result<Self> {
        let mut stman = Self { name: name.into(), nrows, columns: Vec::new(), change_count: 0 };
        for desc in columns {
            stman.add_column(desc)?;
        }
        stman.change_count = 0;
        Ok(stman)
    }

    pub(crate) fn create_boxed(ctx: &StManContext, columns: &[ColumnDesc]) -> Result<Box<dyn StorageManager>> {
        Ok(Box::new(Self::create(ctx.name.clone(), ctx.nrows, columns)?))
    }

    /// Contents are not persistent, so opening starts from zeroed columns.
    pub(crate) fn open_boxed(ctx: &StManContext, columns: &[ColumnDesc]) -> Result<Box<dyn StorageManager>> {
        Self::create_boxed(ctx, columns)
    }

    fn column(&mut self, name: &str, row: RowId) -> Result<&mut MemColumn> {
        check_row(row, self.nrows)?;
        self.columns
            .iter_mut()
            .find(|c| c.desc.name == name)
            .ok_or_else(|| Error::NoSuchColumn { name: name.to_string() })
    }

    fn defined_array(&mut self, name: &str, row: RowId) -> Result<&mut Arc<ArrayValue>> {
        self.column(name, row)?
            .arrays()?
            .get_mut(row as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NoArray { column: name.to_string(), row })
    }
}

impl StorageManager for MemoryStMan {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn nrows(&self) -> u64 {
        self.nrows
    }

    fn add_rows(&mut self, count: u64) -> Result<()> {
        let nrows = (self.nrows + count) as usize;
        for column in &mut self.columns {
            match &mut column.cells {
                Cells::Scalar(values) => values.resize(nrows, Value::zero(column.desc.data_type)),
                Cells::Array(arrays) => arrays.resize(nrows, None),
            }
        }
        self.nrows += count;
        self.change_count += 1;
        Ok(())
    }

    fn remove_row(&mut self, row: RowId) -> Result<()> {
        check_row(row, self.nrows)?;
        for column in &mut self.columns {
            match &mut column.cells {
                Cells::Scalar(values) => {
                    values.remove(row as usize);
                },
                Cells::Array(arrays) => {
                    arrays.remove(row as usize);
                },
            }
        }
        self.nrows -= 1;
        self.change_count += 1;
        Ok(())
    }

    fn add_column(&mut self, desc: &ColumnDesc) -> Result<()> {
        desc.validate()?;
        if self.columns.iter().any(|c| c.desc.name == desc.name) {
            return Err(Error::ColumnExists { name: desc.name.clone() });
        }
        self.columns.push(MemColumn::new(desc, self.nrows));
        self.change_count += 1;
        Ok(())
    }

    fn can_remove_column(&self, column: &str) -> Result<()> {
        if self.columns.iter().any(|c| c.desc.name == column) {
            Ok(())
        } else {
            Err(Error::NoSuchColumn { name: column.to_string() })
        }
    }

    fn remove_column(&mut self, column: &str) -> Result<()> {
        self.can_remove_column(column)?;
        self.columns.retain(|c| c.desc.name != column);
        self.change_count += 1;
        Ok(())
    }

    fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if self.columns.iter().any(|c| c.desc.name == new) {
            return Err(Error::ColumnExists { name: new.to_string() });
        }
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.desc.name == old)
            .ok_or_else(|| Error::NoSuchColumn { name: old.to_string() })?;
        column.desc.name = new.to_string();
        self.change_count += 1;
        Ok(())
    }

    fn get_scalar(&mut self, column: &str, row: RowId) -> Result<Value> {
        Ok(self.column(column, row)?.scalars()?[row as usize])
    }

    fn put_scalar(&mut self, column: &str, row: RowId, value: &Value) -> Result<()> {
        let col = self.column(column, row)?;
        col.desc.check_type(value.data_type())?;
        col.scalars()?[row as usize] = *value;
        Ok(())
    }

    fn shape(&mut self, column: &str, row: RowId) -> Result<Option<Shape>> {
        let arrays = self.column(column, row)?.arrays()?;
        Ok(arrays[row as usize].as_ref().map(|a| a.shape().clone()))
    }

    fn set_shape(&mut self, column: &str, row: RowId, shape: &Shape) -> Result<()> {
        let col = self.column(column, row)?;
        col.desc.check_put_shape(row, shape)?;
        let data_type = col.desc.data_type;
        let cell = &mut col.arrays()?[row as usize];
        if cell.as_ref().is_none_or(|a| a.shape() != shape) {
            *cell = Some(Arc::new(ArrayValue::zeros(data_type, shape.clone())));
        }
        Ok(())
    }

    fn get_array(&mut self, column: &str, row: RowId) -> Result<Option<ArrayValue>> {
        let arrays = self.column(column, row)?.arrays()?;
        Ok(arrays[row as usize].as_deref().cloned())
    }

    fn put_array(&mut self, column: &str, row: RowId, array: &ArrayValue) -> Result<()> {
        let col = self.column(column, row)?;
        col.desc.check_type(array.data_type())?;
        col.desc.check_put_shape(row, array.shape())?;
        col.arrays()?[row as usize] = Some(Arc::new(array.clone()));
        Ok(())
    }

    fn get_slice(&mut self, column: &str, row: RowId, slicer: &Slicer) -> Result<ArrayValue> {
        Ok(self.defined_array(column, row)?.slice(slicer)?)
    }

    fn put_slice(&mut self, column: &str, row: RowId, slicer: &Slicer, section: &ArrayValue) -> Result<()> {
        let array = self.defined_array(column, row)?;
        Arc::make_mut(array).put_slice(slicer, section)?;
        Ok(())
    }

    fn get_scalar_column(&mut self, column: &str) -> Result<Vec<Value>> {
        if self.nrows == 0 {
            self.can_remove_column(column)?;
            return Ok(Vec::new());
        }
        Ok(self.column(column, 0)?.scalars()?.clone())
    }

    fn share_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        check_row(to, self.nrows)?;
        let arrays = self.column(column, from)?.arrays()?;
        let shared = arrays[from as usize]
            .clone()
            .ok_or_else(|| Error::NoArray { column: column.to_string(), row: from })?;
        arrays[to as usize] = Some(shared);
        Ok(())
    }

    fn flush(&mut self, _sync: bool) -> Result<bool> {
        Ok(false)
    }

    fn resync(&mut self, nrows: u64) -> Result<()> {
        if nrows > self.nrows {
            self.add_rows(nrows - self.nrows)?;
        }
        Ok(())
    }

    fn reopen_rw(&mut self) -> Result<()> {
        Ok(())
    }

    fn change_count(&self) -> u64 {
        self.change_count
    }
}
