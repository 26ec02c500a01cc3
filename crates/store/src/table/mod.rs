//! Tables: named columns over a set of storage managers.
//!
//! A table lives in its own directory:
//!
//! - `table.dat` holds the [`TableMeta`] (row count, columns, managers, keywords)
//! - `table.lock` is the cooperative lock file
//! - `table.f<seq>` (and `table.f<seq>i`) are the files of storage manager `seq`
//!
//! # Example
//!
//! ```no_run
//! use coltable_store::{ColumnDesc, LockType, Table, TableOptions};
//! use coltable_types::{ArrayValue, DataType};
//!
//! let columns = [
//!     ColumnDesc::scalar("time", DataType::Float64),
//!     ColumnDesc::fixed_array("uvw", DataType::Float64, [3]),
//! ];
//! let mut table = Table::create("obs.tab", &columns, TableOptions::default())?;
//! table.lock(LockType::Write, 1)?;
//! table.add_row(2)?;
//! table.put("time", 0, 4.5e9_f64)?;
//! table.put_array("uvw", 1, &ArrayValue::from_vec(vec![1.0_f64, 2.0, 3.0]))?;
//! table.unlock()?;
//! # Ok::<(), coltable_store::Error>(())
//! ```

mod column_set;
mod meta;
mod options;
mod sync;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use coltable_types::{
    ArrayValue, Element, Keywords, Shape, Slicer, Value,
    config::{LockConfig, LockMode},
};
pub use column_set::ColumnSet;
pub use meta::{META_FILE, StManEntry, TableMeta};
pub use options::TableOptions;
pub use sync::SyncData;

use crate::{
    bucket::CacheStats,
    column::ColumnDesc,
    error::{Error, Result, RowId},
    lock::{LockFile, LockType},
    stman::check_row,
};

/// Name of the lock file inside the table directory.
pub const LOCK_FILE: &str = "table.lock";

/// An open table.
///
/// Reads need no lock. Mutations need a writable table and, in
/// [`LockMode::User`], a write lock taken with [`Table::lock`].
#[derive(Debug)]
pub struct Table {
    dir: PathBuf,
    columns: ColumnSet,
    keywords: Keywords,
    modify_count: u64,
    lock: LockFile,
    lock_mode: LockMode,
    lock_attempts: u32,
    writable: bool,
    meta_dirty: bool,
    closed: bool,
}

impl Table {
    /// Creates a table with `columns` and no rows in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableExists`] if `path` already holds a table,
    /// [`Error::TableBusy`] if a permanent lock cannot be taken, or the
    /// error of a column or storage manager that cannot be created.
    pub fn create(path: impl AsRef<Path>, columns: &[ColumnDesc], options: TableOptions) -> Result<Self> {
        options.storage.validate()?;
        options.lock.validate()?;
        let dir = path.as_ref().to_path_buf();
        if TableMeta::exists(&dir) {
            return Err(Error::TableExists { path: dir });
        }
        fs::create_dir_all(&dir).map_err(|source| Error::FileIo { path: dir.clone(), source })?;

        let mut lock = open_lock(&dir, &options.lock)?;
        if options.lock.mode == LockMode::Permanent && !lock.acquire(LockType::Write, options.lock.attempts)? {
            return Err(Error::TableBusy { path: lock.path().to_path_buf() });
        }
        let columns = ColumnSet::create(
            dir.clone(),
            options.registry.clone(),
            options.storage.clone(),
            options.default_stman.clone(),
            columns,
        )?;
        let mut table = Self {
            dir,
            columns,
            keywords: Keywords::new(),
            modify_count: 0,
            lock,
            lock_mode: options.lock.mode,
            lock_attempts: options.lock.attempts,
            writable: true,
            meta_dirty: true,
            closed: false,
        };
        table.flush(false)?;
        tracing::info!(
            path = %table.dir.display(),
            columns = table.columns.columns().len(),
            lock_mode = ?table.lock_mode,
            "Created table"
        );
        Ok(table)
    }

    /// Opens the table in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if there is no table at `path`,
    /// [`Error::TableBusy`] if a permanent lock cannot be taken,
    /// [`Error::UnknownStorageManager`] if the registry lacks a manager
    /// type the table uses, or a corruption error for malformed files.
    pub fn open(path: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        options.lock.validate()?;
        let dir = path.as_ref().to_path_buf();
        if !TableMeta::exists(&dir) {
            return Err(Error::FileIo { path: TableMeta::path(&dir), source: io::ErrorKind::NotFound.into() });
        }
        let mut lock = open_lock(&dir, &options.lock)?;
        if options.lock.mode == LockMode::Permanent {
            let kind = if options.writable { LockType::Write } else { LockType::Read };
            if !lock.acquire(kind, options.lock.attempts)? {
                return Err(Error::TableBusy { path: lock.path().to_path_buf() });
            }
        }
        let meta = TableMeta::read(&dir)?;
        let columns = ColumnSet::open(
            dir.clone(),
            options.registry.clone(),
            options.storage.clone(),
            options.default_stman.clone(),
            options.writable,
            &meta,
        )?;
        tracing::info!(
            path = %dir.display(),
            rows = meta.nrows,
            columns = meta.columns.len(),
            writable = options.writable,
            "Opened table"
        );
        Ok(Self {
            dir,
            columns,
            keywords: meta.keywords,
            modify_count: meta.modify_count,
            lock,
            lock_mode: options.lock.mode,
            lock_attempts: options.lock.attempts,
            writable: options.writable,
            meta_dirty: false,
            closed: false,
        })
    }

    /// Table directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Number of rows.
    pub fn nrow(&self) -> u64 {
        self.columns.nrows()
    }

    /// Number of columns.
    pub fn ncolumn(&self) -> usize {
        self.columns.columns().len()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.columns().iter().map(|c| c.name.as_str())
    }

    /// Description of `column`, including its storage manager binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] for an unknown column.
    pub fn column_desc(&self, column: &str) -> Result<&ColumnDesc> {
        self.columns.desc(column)
    }

    /// The columns and their storage managers.
    pub fn column_set(&self) -> &ColumnSet {
        &self.columns
    }

    /// Whether the table is open for writing.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of modifications made through any handle, as far as this
    /// handle knows.
    pub fn modify_count(&self) -> u64 {
        self.modify_count
    }

    fn check_mutable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::NotWritable { name: self.dir.display().to_string() });
        }
        if !self.lock.has_lock(LockType::Write) {
            return Err(Error::NotLocked { path: self.dir.clone() });
        }
        Ok(())
    }

    fn mark_modified(&mut self, structural: bool) {
        self.modify_count += 1;
        if structural {
            self.meta_dirty = true;
        }
    }

    /// Appends `count` rows; scalar cells are zero and array cells
    /// undefined.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotWritable`] or [`Error::NotLocked`] if the table
    /// cannot be modified, or an I/O error.
    pub fn add_row(&mut self, count: u64) -> Result<()> {
        self.check_mutable()?;
        self.columns.add_rows(count)?;
        self.mark_modified(true);
        tracing::debug!(path = %self.dir.display(), rows = count, "Added rows");
        Ok(())
    }

    /// Removes `row`; later rows move down by one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowOutOfRange`] for a bad row.
    pub fn remove_row(&mut self, row: RowId) -> Result<()> {
        self.check_mutable()?;
        self.columns.remove_row(row)?;
        self.mark_modified(true);
        Ok(())
    }

    /// Adds a column. Columns without a binding go to the default storage
    /// manager; a binding naming a new manager instance creates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnExists`] for a duplicate name or
    /// [`Error::InvalidColumn`] for an invalid description.
    pub fn add_column(&mut self, desc: &ColumnDesc) -> Result<()> {
        self.check_mutable()?;
        self.columns.add_column(desc)?;
        self.mark_modified(true);
        tracing::debug!(path = %self.dir.display(), column = %desc.name, "Added column");
        Ok(())
    }

    /// Removes columns. Every column is checked before any is removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] or [`Error::CannotRemoveColumn`]
    /// without removing anything.
    pub fn remove_columns(&mut self, names: &[&str]) -> Result<()> {
        self.check_mutable()?;
        self.columns.remove_columns(names)?;
        self.mark_modified(true);
        tracing::debug!(path = %self.dir.display(), columns = ?names, "Removed columns");
        Ok(())
    }

    /// Renames a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] or [`Error::ColumnExists`].
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        self.check_mutable()?;
        self.columns.rename_column(old, new)?;
        self.mark_modified(true);
        Ok(())
    }

    /// Reads a scalar cell.
    ///
    /// # Errors
    ///
    /// Returns a checked error for an unknown column, a bad row, or an
    /// array column.
    pub fn get_scalar(&mut self, column: &str, row: RowId) -> Result<Value> {
        let (_, stman) = self.columns.column_mut(column)?;
        stman.get_scalar(column, row)
    }

    /// Writes a scalar cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnTypeMismatch`] for a value of another type.
    pub fn put_scalar(&mut self, column: &str, row: RowId, value: &Value) -> Result<()> {
        self.check_mutable()?;
        let (_, stman) = self.columns.column_mut(column)?;
        stman.put_scalar(column, row, value)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Reads a scalar cell as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnTypeMismatch`] if the column does not hold
    /// `T`.
    pub fn get<T: Element>(&mut self, column: &str, row: RowId) -> Result<T> {
        let value = self.get_scalar(column, row)?;
        T::from_value(value).ok_or_else(|| Error::ColumnTypeMismatch {
            column: column.to_string(),
            expected: value.data_type(),
            found: T::DATA_TYPE,
        })
    }

    /// Writes a scalar cell from a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnTypeMismatch`] if the column does not hold
    /// `T`.
    pub fn put<T: Element>(&mut self, column: &str, row: RowId, value: T) -> Result<()> {
        self.put_scalar(column, row, &value.into_value())
    }

    /// Reads a whole scalar column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`] for an array column.
    pub fn get_column(&mut self, column: &str) -> Result<Vec<Value>> {
        let (desc, stman) = self.columns.column_mut(column)?;
        if !desc.can_access_scalar_column() {
            return Err(Error::UnsupportedOperation { column: column.to_string(), operation: "column access" });
        }
        stman.get_scalar_column(column)
    }

    /// Writes a whole scalar column, one value per row. Nothing is written
    /// unless every value fits the column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`] for an array column,
    /// [`Error::RowOutOfRange`] if `values` is not one per row, or
    /// [`Error::ColumnTypeMismatch`] for a value of the wrong type.
    pub fn put_column(&mut self, column: &str, values: &[Value]) -> Result<()> {
        self.check_mutable()?;
        let nrows = self.columns.nrows();
        let (desc, stman) = self.columns.column_mut(column)?;
        if !desc.can_access_scalar_column() {
            return Err(Error::UnsupportedOperation { column: column.to_string(), operation: "column access" });
        }
        if values.len() as u64 != nrows {
            return Err(Error::RowOutOfRange { row: values.len() as u64, nrows });
        }
        for value in values {
            desc.check_type(value.data_type())?;
        }
        stman.put_scalar_column(column, values)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Shape of an array cell, or `None` if it holds no array.
    ///
    /// # Errors
    ///
    /// Returns a checked error for an unknown column, a bad row, or a
    /// scalar column.
    pub fn shape(&mut self, column: &str, row: RowId) -> Result<Option<Shape>> {
        let (_, stman) = self.columns.column_mut(column)?;
        stman.shape(column, row)
    }

    /// Returns `true` if the cell holds a value. Scalar cells always do.
    ///
    /// # Errors
    ///
    /// Returns a checked error for an unknown column or a bad row.
    pub fn is_defined(&mut self, column: &str, row: RowId) -> Result<bool> {
        let nrows = self.nrow();
        let (desc, stman) = self.columns.column_mut(column)?;
        if desc.is_array() {
            Ok(stman.shape(column, row)?.is_some())
        } else {
            check_row(row, nrows)?;
            Ok(true)
        }
    }

    /// Gives an array cell a zero-filled array of `shape`; an array that
    /// already has this shape is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the column does not allow `shape`.
    pub fn set_shape(&mut self, column: &str, row: RowId, shape: &Shape) -> Result<()> {
        self.check_mutable()?;
        let (_, stman) = self.columns.column_mut(column)?;
        stman.set_shape(column, row, shape)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Reads an array cell, or `None` if it holds no array.
    ///
    /// # Errors
    ///
    /// Returns a checked error for an unknown column, a bad row, or a
    /// scalar column.
    pub fn get_array(&mut self, column: &str, row: RowId) -> Result<Option<ArrayValue>> {
        let (_, stman) = self.columns.column_mut(column)?;
        stman.get_array(column, row)
    }

    /// Writes an array cell, setting its shape first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] or [`Error::ColumnTypeMismatch`]
    /// without touching the stored cell.
    pub fn put_array(&mut self, column: &str, row: RowId, array: &ArrayValue) -> Result<()> {
        self.check_mutable()?;
        let (_, stman) = self.columns.column_mut(column)?;
        stman.put_array(column, row, array)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Reads a section of an array cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoArray`] if the cell holds no array.
    pub fn get_slice(&mut self, column: &str, row: RowId, slicer: &Slicer) -> Result<ArrayValue> {
        let (_, stman) = self.columns.column_mut(column)?;
        stman.get_slice(column, row, slicer)
    }

    /// Writes a section of an array cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoArray`] if the cell holds no array.
    pub fn put_slice(&mut self, column: &str, row: RowId, slicer: &Slicer, section: &ArrayValue) -> Result<()> {
        self.check_mutable()?;
        let (_, stman) = self.columns.column_mut(column)?;
        stman.put_slice(column, row, slicer, section)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Makes row `to` share the array of row `from`. A later write to
    /// either row detaches it from the other.
    ///
    /// # Errors
    ///
    /// Returns a checked error for bad rows or a scalar column.
    pub fn share_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        self.check_mutable()?;
        let (_, stman) = self.columns.column_mut(column)?;
        stman.share_cell(column, from, to)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Copies the array of row `from` into an independent array in row `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoArray`] if row `from` holds no array.
    pub fn copy_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        self.check_mutable()?;
        let (_, stman) = self.columns.column_mut(column)?;
        stman.copy_cell(column, from, to)?;
        self.mark_modified(false);
        Ok(())
    }

    /// Table keywords.
    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    /// Table keywords, for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotWritable`] or [`Error::NotLocked`].
    pub fn keywords_mut(&mut self) -> Result<&mut Keywords> {
        self.check_mutable()?;
        self.mark_modified(true);
        Ok(&mut self.keywords)
    }

    /// Keywords of `column`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] for an unknown column.
    pub fn column_keywords(&self, column: &str) -> Result<&Keywords> {
        Ok(&self.columns.desc(column)?.keywords)
    }

    /// Keywords of `column`, for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] for an unknown column, or
    /// [`Error::NotWritable`] or [`Error::NotLocked`].
    pub fn column_keywords_mut(&mut self, column: &str) -> Result<&mut Keywords> {
        self.check_mutable()?;
        self.columns.desc(column)?;
        self.mark_modified(true);
        Ok(&mut self.columns.desc_mut(column)?.keywords)
    }

    fn meta(&self) -> TableMeta {
        TableMeta {
            nrows: self.columns.nrows(),
            columns: self.columns.columns().to_vec(),
            stmans: self.columns.stmans().cloned().collect(),
            keywords: self.keywords.clone(),
            modify_count: self.modify_count,
            next_seq: self.columns.next_seq(),
        }
    }

    /// Writes all pending changes, forcing them to disk if `sync` is set.
    ///
    /// Returns `true` if anything was written; a second flush without
    /// changes in between writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    pub fn flush(&mut self, sync: bool) -> Result<bool> {
        if !self.writable {
            return Ok(false);
        }
        let mut wrote = self.columns.flush(sync)?;
        if self.meta_dirty {
            self.meta().write(&self.dir, sync)?;
            self.meta_dirty = false;
            wrote = true;
        }
        self.columns.purge_dropped()?;
        Ok(wrote)
    }

    /// Discards cached state and rereads the table from disk.
    ///
    /// Unflushed changes are lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read.
    pub fn resync(&mut self) -> Result<()> {
        let meta = TableMeta::read(&self.dir)?;
        self.columns.resync(&meta)?;
        self.keywords = meta.keywords;
        self.modify_count = meta.modify_count;
        self.meta_dirty = false;
        tracing::debug!(path = %self.dir.display(), rows = meta.nrows, "Resynced table");
        Ok(())
    }

    /// Reopens a read-only table for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableBusy`] if a permanent write lock cannot be
    /// taken, or an I/O error if a file cannot be opened for writing.
    pub fn reopen_rw(&mut self) -> Result<()> {
        if self.writable {
            return Ok(());
        }
        if self.lock_mode == LockMode::Permanent && !self.lock.acquire(LockType::Write, self.lock_attempts)? {
            return Err(Error::TableBusy { path: self.lock.path().to_path_buf() });
        }
        self.columns.reopen_rw()?;
        self.writable = true;
        tracing::info!(path = %self.dir.display(), "Reopened table for writing");
        Ok(())
    }

    /// The synchronization record describing this handle's view.
    pub fn sync_data(&self) -> SyncData {
        SyncData {
            nrows: self.columns.nrows(),
            ncolumns: self.columns.columns().len() as u32,
            modify_count: self.modify_count,
            stman_changes: self.columns.change_counts(),
        }
    }

    /// Acquires a lock, making up to `attempts` tries (0 waits until it
    /// succeeds). If another process changed the table since this handle
    /// last saw it, the table is resynced.
    ///
    /// Returns `false` if the lock could not be acquired.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be accessed, or the
    /// error of a failed resync.
    pub fn lock(&mut self, kind: LockType, attempts: u32) -> Result<bool> {
        if !self.lock.acquire(kind, attempts)? {
            return Ok(false);
        }
        if let Some(theirs) = SyncData::decode(self.lock.info())?
            && theirs != self.sync_data()
        {
            tracing::debug!(
                path = %self.dir.display(),
                ours = self.modify_count,
                theirs = theirs.modify_count,
                "Table changed by another process"
            );
            self.resync()?;
            self.modify_count = theirs.modify_count;
        }
        Ok(true)
    }

    /// Flushes and releases the lock, leaving the synchronization record
    /// for the next holder. A permanent lock is kept until the table is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if flushing or releasing fails.
    pub fn unlock(&mut self) -> Result<()> {
        if self.lock_mode == LockMode::Permanent {
            return Ok(());
        }
        self.release_lock()
    }

    fn release_lock(&mut self) -> Result<()> {
        self.flush(false)?;
        let blob = self.sync_data().encode()?;
        self.lock.release(Some(&blob))
    }

    /// Returns `true` if a lock covering `kind` is held.
    pub fn has_lock(&self, kind: LockType) -> bool {
        self.lock.has_lock(kind)
    }

    /// Returns `true` if another handle has the table open.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock state cannot be queried.
    pub fn is_multi_used(&self) -> Result<bool> {
        self.lock.is_multi_used()
    }

    /// Returns `false` if locking is degraded and every lock request
    /// succeeds without locking anything.
    pub fn has_real_locking(&self) -> bool {
        !self.lock.is_degraded()
    }

    /// Returns `true` if other processes are waiting for the lock. The lock
    /// file is read at most once per configured inspect interval.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be read.
    pub fn has_pending_requests(&mut self) -> Result<bool> {
        self.lock.inspect(false)
    }

    /// Bucket cache statistics per storage manager.
    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        self.columns.cache_stats()
    }

    /// Flushes the table and releases its lock.
    ///
    /// Dropping a table does the same but can only log failures.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if flushing or releasing fails.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.release_lock()?;
        tracing::info!(path = %self.dir.display(), "Closed table");
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.release_lock() {
            tracing::warn!(path = %self.dir.display(), %error, "Failed to close table cleanly");
        }
    }
}

fn open_lock(dir: &Path, config: &LockConfig) -> Result<LockFile> {
    let path = dir.join(LOCK_FILE);
    if config.mode == LockMode::NoLocking {
        return Ok(LockFile::degraded(path, config));
    }
    LockFile::open(path, config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use coltable_types::DataType;
    use tempfile::TempDir;

    use super::*;

    fn options(mode: LockMode) -> TableOptions {
        TableOptions::builder().lock(LockConfig::builder().mode(mode).build().unwrap()).build()
    }

    fn columns() -> Vec<ColumnDesc> {
        vec![
            ColumnDesc::scalar("id", DataType::Int32),
            ColumnDesc::fixed_array("ints", DataType::Int32, [4]),
            ColumnDesc::variable_array("data", DataType::Float64),
        ]
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        {
            let mut table = Table::create(&path, &columns(), options(LockMode::Permanent)).unwrap();
            table.add_row(3).unwrap();
            table.put("id", 2, 42_i32).unwrap();
            table.keywords_mut().unwrap().set("origin", "test");
            table.column_keywords_mut("data").unwrap().set("unit", "Jy");
        }
        let mut table = Table::open(&path, options(LockMode::Permanent)).unwrap();
        assert_eq!(table.nrow(), 3);
        assert_eq!(table.column_names().collect::<Vec<_>>(), ["id", "ints", "data"]);
        assert_eq!(table.get::<i32>("id", 2).unwrap(), 42);
        assert!(table.keywords().contains("origin"));
        assert!(table.column_keywords("data").unwrap().contains("unit"));
        assert!(table.get::<f64>("id", 2).is_err());
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        drop(Table::create(&path, &columns(), options(LockMode::NoLocking)).unwrap());
        let err = Table::create(&path, &columns(), options(LockMode::NoLocking)).unwrap_err();
        assert!(matches!(err, Error::TableExists { .. }));
        assert!(err.is_checked());
    }

    #[test]
    fn test_open_missing_table() {
        let dir = TempDir::new().unwrap();
        let err = Table::open(dir.path().join("none"), TableOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_user_mode_requires_write_lock() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::create(dir.path().join("t"), &columns(), options(LockMode::User)).unwrap();
        assert!(table.has_real_locking());
        assert!(matches!(table.add_row(1).unwrap_err(), Error::NotLocked { .. }));

        assert!(table.lock(LockType::Read, 1).unwrap());
        assert!(matches!(table.add_row(1).unwrap_err(), Error::NotLocked { .. }));

        assert!(table.lock(LockType::Write, 1).unwrap());
        table.add_row(2).unwrap();
        table.unlock().unwrap();
        assert!(!table.has_lock(LockType::Read));
        assert_eq!(table.get::<i32>("id", 1).unwrap(), 0);
    }

    #[test]
    fn test_no_locking_is_degraded() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::create(dir.path().join("t"), &columns(), options(LockMode::NoLocking)).unwrap();
        assert!(!table.has_real_locking());
        assert!(table.has_lock(LockType::Write));
        table.add_row(1).unwrap();
        assert!(!dir.path().join("t").join(LOCK_FILE).exists());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        Table::create(&path, &columns(), options(LockMode::NoLocking)).unwrap().close().unwrap();

        let mut table = Table::open(&path, options(LockMode::NoLocking).read_only()).unwrap();
        let err = table.add_row(1).unwrap_err();
        assert!(matches!(err, Error::NotWritable { .. }));
        assert!(!table.flush(false).unwrap());

        table.reopen_rw().unwrap();
        table.add_row(1).unwrap();
        assert_eq!(table.nrow(), 1);
    }

    #[test]
    fn test_flush_reports_changes_once() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::create(dir.path().join("t"), &columns(), options(LockMode::NoLocking)).unwrap();
        assert!(!table.flush(false).unwrap());
        table.add_row(2).unwrap();
        table.put_array("ints", 0, &ArrayValue::from_vec(vec![1_i32, 2, 3, 4])).unwrap();
        assert!(table.flush(false).unwrap());
        assert!(!table.flush(true).unwrap());
    }

    #[test]
    fn test_column_access_and_is_defined() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::create(dir.path().join("t"), &columns(), options(LockMode::NoLocking)).unwrap();
        table.add_row(3).unwrap();
        table.put_column("id", &[Value::Int32(1), Value::Int32(2), Value::Int32(3)]).unwrap();
        assert_eq!(table.get_column("id").unwrap()[2], Value::Int32(3));
        assert!(matches!(table.get_column("ints").unwrap_err(), Error::UnsupportedOperation { .. }));

        assert!(table.is_defined("id", 0).unwrap());
        assert!(!table.is_defined("data", 0).unwrap());
        table.set_shape("data", 0, &Shape::new([2, 2])).unwrap();
        assert!(table.is_defined("data", 0).unwrap());
        assert!(table.is_defined("id", 3).is_err());
    }

    #[test]
    fn test_remove_and_rename_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        {
            let mut table = Table::create(&path, &columns(), options(LockMode::NoLocking)).unwrap();
            table.add_row(1).unwrap();
            table.remove_columns(&["ints"]).unwrap();
            table.rename_column("data", "spectrum").unwrap();
            table.add_column(&ColumnDesc::scalar("flag", DataType::Bool)).unwrap();
            table.put("flag", 0, true).unwrap();
        }
        let mut table = Table::open(&path, options(LockMode::NoLocking)).unwrap();
        assert_eq!(table.column_names().collect::<Vec<_>>(), ["id", "spectrum", "flag"]);
        assert!(table.get::<bool>("flag", 0).unwrap());
        assert!(table.column_desc("ints").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lock_resyncs_after_foreign_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t");
        let mut first = Table::create(&path, &columns(), options(LockMode::User)).unwrap();
        let mut second = Table::open(&path, options(LockMode::User)).unwrap();
        assert!(first.is_multi_used().unwrap());

        assert!(first.lock(LockType::Write, 1).unwrap());
        first.add_row(2).unwrap();
        first.put("id", 1, 7_i32).unwrap();
        first.unlock().unwrap();

        assert_eq!(second.nrow(), 0);
        assert!(second.lock(LockType::Read, 1).unwrap());
        assert_eq!(second.nrow(), 2);
        assert_eq!(second.get::<i32>("id", 1).unwrap(), 7);
        second.unlock().unwrap();
    }
}
