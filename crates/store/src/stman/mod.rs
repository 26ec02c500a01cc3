//! Storage managers.
//!
//! A storage manager owns the data of one or more columns of a table. The
//! table talks to it through the [`StorageManager`] trait; concrete managers
//! are instantiated by type name through an explicit [`StManRegistry`].
//!
//! Row numbers passed to a manager are checked against its own row count,
//! and cells are addressed by column name.

mod memory;
mod registry;
mod standard;

use std::path::PathBuf;

use coltable_types::{ArrayValue, Shape, Slicer, Value, config::StorageConfig};
pub use memory::MemoryStMan;
pub use registry::{CreateFn, OpenFn, StManRegistry};
pub use standard::StandardStMan;

use crate::{
    bucket::CacheStats,
    column::ColumnDesc,
    error::{Error, Result, RowId},
};

/// Everything a storage manager needs to create or open its files.
#[derive(Debug, Clone)]
pub struct StManContext {
    /// Table directory.
    pub dir: PathBuf,
    /// Name of the manager instance.
    pub name: String,
    /// Sequence number of the manager within the table; names its files.
    pub seq: u32,
    /// Storage tuning.
    pub storage: StorageConfig,
    /// Whether the table is opened for writing.
    pub writable: bool,
    /// Number of rows in the table.
    pub nrows: u64,
}

impl StManContext {
    /// Path of the manager's file with the given suffix (`table.f<seq><suffix>`).
    pub fn file_path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("table.f{}{suffix}", self.seq))
    }

    /// Deletes every file the manager may have created.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an existing file cannot be removed.
    pub fn remove_files(&self) -> Result<()> {
        for suffix in FILE_SUFFIXES {
            let path = self.file_path(suffix);
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed storage manager file"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {},
                Err(source) => return Err(Error::FileIo { path, source }),
            }
        }
        Ok(())
    }
}

/// Suffixes of the files a manager may own: the bucket file and the
/// array heap.
const FILE_SUFFIXES: [&str; 2] = ["", "i"];

/// Data access and maintenance operations of a storage manager.
///
/// Shape and type rules are enforced by the manager against the
/// [`ColumnDesc`] it was given; a violation is a checked error and leaves the
/// stored data untouched.
pub trait StorageManager: Send + std::fmt::Debug {
    /// Registered type name (e.g. `StandardStMan`).
    fn type_name(&self) -> &'static str;

    /// Name of this instance.
    fn name(&self) -> &str;

    /// Number of rows.
    fn nrows(&self) -> u64;

    /// Appends `count` rows; new scalar cells are zero and new array cells
    /// undefined.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if new buckets cannot be set up.
    fn add_rows(&mut self, count: u64) -> Result<()>;

    /// Removes a row; later rows move down by one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowOutOfRange`] for a bad row.
    fn remove_row(&mut self, row: RowId) -> Result<()>;

    /// Adds a column; existing rows get a zero or undefined cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnExists`] for a duplicate name. If the column
    /// does not fit the current layout and rearranging the rows fails, the
    /// old layout is kept.
    fn add_column(&mut self, desc: &ColumnDesc) -> Result<()>;

    /// Checks whether `column` can be removed, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CannotRemoveColumn`] or [`Error::NoSuchColumn`].
    fn can_remove_column(&self, column: &str) -> Result<()>;

    /// Removes a column and releases its data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] for an unknown column.
    fn remove_column(&mut self, column: &str) -> Result<()>;

    /// Renames a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] or [`Error::ColumnExists`].
    fn rename_column(&mut self, old: &str, new: &str) -> Result<()>;

    /// Reads a scalar cell.
    ///
    /// # Errors
    ///
    /// Returns a checked error for a bad row or a non-scalar column.
    fn get_scalar(&mut self, column: &str, row: RowId) -> Result<Value>;

    /// Writes a scalar cell.
    ///
    /// # Errors
    ///
    /// Returns a checked error for a bad row, a non-scalar column, or a
    /// value of the wrong type.
    fn put_scalar(&mut self, column: &str, row: RowId, value: &Value) -> Result<()>;

    /// Shape of an array cell, or `None` if the cell holds no array.
    ///
    /// # Errors
    ///
    /// Returns a checked error for a bad row or a scalar column.
    fn shape(&mut self, column: &str, row: RowId) -> Result<Option<Shape>>;

    /// Gives an array cell a (zero-filled) array of `shape`. An array that
    /// already has this shape is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the column does not allow the
    /// shape.
    fn set_shape(&mut self, column: &str, row: RowId, shape: &Shape) -> Result<()>;

    /// Reads an array cell, or `None` if it holds no array.
    ///
    /// # Errors
    ///
    /// Returns a checked error for a bad row or a scalar column.
    fn get_array(&mut self, column: &str, row: RowId) -> Result<Option<ArrayValue>>;

    /// Writes an array cell, setting its shape first.
    ///
    /// # Errors
    ///
    /// Returns a checked error if the type or shape is not allowed.
    fn put_array(&mut self, column: &str, row: RowId, array: &ArrayValue) -> Result<()>;

    /// Reads a section of an array cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoArray`] if the cell holds no array.
    fn get_slice(&mut self, column: &str, row: RowId, slicer: &Slicer) -> Result<ArrayValue>;

    /// Writes a section of an array cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoArray`] if the cell holds no array.
    fn put_slice(&mut self, column: &str, row: RowId, slicer: &Slicer, section: &ArrayValue) -> Result<()>;

    /// Reads all cells of a scalar column.
    ///
    /// # Errors
    ///
    /// Returns a checked error for a non-scalar column.
    fn get_scalar_column(&mut self, column: &str) -> Result<Vec<Value>> {
        (0..self.nrows()).map(|row| self.get_scalar(column, row)).collect()
    }

    /// Writes all cells of a scalar column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowOutOfRange`] if `values` is not one per row, or a
    /// checked error for values of the wrong type. Rows before a mistyped
    /// value are already written by then; [`crate::Table::put_column`]
    /// checks the types first.
    fn put_scalar_column(&mut self, column: &str, values: &[Value]) -> Result<()> {
        if values.len() as u64 != self.nrows() {
            return Err(Error::RowOutOfRange { row: values.len() as u64, nrows: self.nrows() });
        }
        for (row, value) in values.iter().enumerate() {
            self.put_scalar(column, row as RowId, value)?;
        }
        Ok(())
    }

    /// Makes row `to` refer to the same array as row `from`.
    ///
    /// Managers without shared storage fall back to a copy.
    ///
    /// # Errors
    ///
    /// Returns a checked error for bad rows or a scalar column.
    fn share_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        self.copy_cell(column, from, to)
    }

    /// Copies the array of row `from` into an independent array in row `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoArray`] if row `from` holds no array.
    fn copy_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        let array = self
            .get_array(column, from)?
            .ok_or_else(|| Error::NoArray { column: column.to_string(), row: from })?;
        self.put_array(column, to, &array)
    }

    /// Writes all pending changes, forcing them to disk if `sync` is set.
    ///
    /// Returns `true` if anything was written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    fn flush(&mut self, sync: bool) -> Result<bool>;

    /// Discards cached state and rereads it from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read.
    fn resync(&mut self, nrows: u64) -> Result<()>;

    /// Reopens the manager's files for writing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file cannot be opened for writing.
    fn reopen_rw(&mut self) -> Result<()>;

    /// Counter bumped by every structural change (rows, columns, layout).
    fn change_count(&self) -> u64;

    /// Bucket cache statistics, for managers with a bucket cache.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

/// Checks `row` against a row count.
pub(crate) fn check_row(row: RowId, nrows: u64) -> Result<()> {
    if row < nrows { Ok(()) } else { Err(Error::RowOutOfRange { row, nrows }) }
}
