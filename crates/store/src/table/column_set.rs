//! The columns of a table and the storage managers holding them.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use coltable_types::config::StorageConfig;

use super::meta::{StManEntry, TableMeta};
use crate::{
    bucket::CacheStats,
    column::{ColumnDesc, StManBinding},
    error::{Error, Result, RowId},
    stman::{StManContext, StManRegistry, StorageManager, check_row},
};

#[derive(Debug)]
struct StManSlot {
    entry: StManEntry,
    stman: Box<dyn StorageManager>,
}

/// Ordered named columns, each bound to exactly one storage manager.
///
/// A manager may hold several columns. A manager left without columns is
/// dropped; its files are deleted by [`ColumnSet::purge_dropped`] once the
/// table metadata no longer lists it.
#[derive(Debug)]
pub struct ColumnSet {
    dir: PathBuf,
    registry: Arc<StManRegistry>,
    storage: StorageConfig,
    default_stman: String,
    writable: bool,
    nrows: u64,
    columns: Vec<ColumnDesc>,
    stmans: Vec<StManSlot>,
    next_seq: u32,
    /// Dropped managers whose files still exist.
    dropped: Vec<StManContext>,
}

impl ColumnSet {
    /// Creates the storage managers for `columns` in `dir`, with no rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnExists`] for duplicate names,
    /// [`Error::InvalidColumn`] for invalid descriptions, or the error of a
    /// manager that cannot be created.
    pub(crate) fn create(
        dir: PathBuf,
        registry: Arc<StManRegistry>,
        storage: StorageConfig,
        default_stman: String,
        columns: &[ColumnDesc],
    ) -> Result<Self> {
        let mut set = Self {
            dir,
            registry,
            storage,
            default_stman,
            writable: true,
            nrows: 0,
            columns: Vec::with_capacity(columns.len()),
            stmans: Vec::new(),
            next_seq: 0,
            dropped: Vec::new(),
        };
        for desc in columns {
            set.check_new_column(desc)?;
            let bound = set.bind(desc);
            set.check_binding(&bound)?;
            set.columns.push(bound);
        }
        let mut bindings: Vec<StManBinding> = Vec::new();
        for desc in &set.columns {
            if let Some(binding) = &desc.binding
                && !bindings.iter().any(|b| b.name == binding.name)
            {
                bindings.push(binding.clone());
            }
        }
        for binding in bindings {
            let bound = set.bound_columns(&binding.name);
            set.create_manager(&binding, &bound)?;
        }
        Ok(set)
    }

    /// Opens the storage managers listed in `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStorageManager`] if the registry lacks a
    /// manager type, or the error of a manager that cannot be opened.
    pub(crate) fn open(
        dir: PathBuf,
        registry: Arc<StManRegistry>,
        storage: StorageConfig,
        default_stman: String,
        writable: bool,
        meta: &TableMeta,
    ) -> Result<Self> {
        let mut set = Self {
            dir,
            registry,
            storage,
            default_stman,
            writable,
            nrows: meta.nrows,
            columns: meta.columns.clone(),
            stmans: Vec::with_capacity(meta.stmans.len()),
            next_seq: meta.next_seq,
            dropped: Vec::new(),
        };
        for entry in &meta.stmans {
            let slot = set.open_manager(entry)?;
            set.stmans.push(slot);
        }
        Ok(set)
    }

    /// Number of rows.
    pub fn nrows(&self) -> u64 {
        self.nrows
    }

    /// Columns in table order.
    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    /// Storage manager instances in table order.
    pub fn stmans(&self) -> impl Iterator<Item = &StManEntry> {
        self.stmans.iter().map(|slot| &slot.entry)
    }

    /// Sequence number the next manager will get.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Description of `column`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchColumn`] for an unknown column.
    pub fn desc(&self, column: &str) -> Result<&ColumnDesc> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .ok_or_else(|| Error::NoSuchColumn { name: column.to_string() })
    }

    pub(crate) fn desc_mut(&mut self, column: &str) -> Result<&mut ColumnDesc> {
        self.columns
            .iter_mut()
            .find(|c| c.name == column)
            .ok_or_else(|| Error::NoSuchColumn { name: column.to_string() })
    }

    /// The description of `column` together with the manager holding it.
    pub(crate) fn column_mut(&mut self, column: &str) -> Result<(&ColumnDesc, &mut dyn StorageManager)> {
        let desc = self
            .columns
            .iter()
            .find(|c| c.name == column)
            .ok_or_else(|| Error::NoSuchColumn { name: column.to_string() })?;
        let stman_name = binding_name(desc);
        let slot = self.stmans.iter_mut().find(|s| s.entry.name == stman_name).ok_or_else(|| {
            Error::Corrupted {
                name: self.dir.display().to_string(),
                reason: format!("column {column} is bound to missing storage manager {stman_name}"),
            }
        })?;
        Ok((desc, slot.stman.as_mut()))
    }

    /// Appends `count` rows to every manager. If one of them fails, the
    /// rows already appended to the others are removed again.
    pub(crate) fn add_rows(&mut self, count: u64) -> Result<()> {
        for done in 0..self.stmans.len() {
            if let Err(error) = self.stmans[done].stman.add_rows(count) {
                self.undo_add_rows(done, count);
                return Err(error);
            }
        }
        self.nrows += count;
        Ok(())
    }

    fn undo_add_rows(&mut self, managers: usize, count: u64) {
        let first = self.nrows;
        for slot in &mut self.stmans[..managers] {
            for row in (first..first + count).rev() {
                if let Err(error) = slot.stman.remove_row(row) {
                    tracing::warn!(
                        dir = %self.dir.display(),
                        stman = %slot.entry.name,
                        %error,
                        "Failed to undo appended rows"
                    );
                    break;
                }
            }
        }
    }

    /// Removes `row` from every manager.
    pub(crate) fn remove_row(&mut self, row: RowId) -> Result<()> {
        check_row(row, self.nrows)?;
        for slot in &mut self.stmans {
            slot.stman.remove_row(row)?;
        }
        self.nrows -= 1;
        Ok(())
    }

    /// Adds a column, creating its manager if the binding names a new one.
    pub(crate) fn add_column(&mut self, desc: &ColumnDesc) -> Result<()> {
        self.check_new_column(desc)?;
        let bound = self.bind(desc);
        self.check_binding(&bound)?;
        let stman_name = binding_name(&bound).to_string();
        match self.stmans.iter_mut().find(|s| s.entry.name == stman_name) {
            Some(slot) => slot.stman.add_column(&bound)?,
            None => {
                let binding = bound.binding.clone().unwrap_or_else(|| self.default_binding());
                self.create_manager(&binding, std::slice::from_ref(&bound))?;
            },
        }
        self.columns.push(bound);
        Ok(())
    }

    /// Removes `names`, after checking with every involved manager that
    /// all of them can go.
    ///
    /// Managers keeping some of their columns remove the others first.
    /// Managers losing all of them are then closed and queued for
    /// [`ColumnSet::purge_dropped`].
    pub(crate) fn remove_columns(&mut self, names: &[&str]) -> Result<()> {
        let names: BTreeSet<&str> = names.iter().copied().collect();
        for name in &names {
            let (_, stman) = self.column_mut(name)?;
            stman.can_remove_column(name)?;
        }
        let columns = &self.columns;
        let mut emptied = Vec::new();
        for (index, slot) in self.stmans.iter_mut().enumerate() {
            let bound: Vec<&str> =
                columns.iter().filter(|c| binding_name(c) == slot.entry.name).map(|c| c.name.as_str()).collect();
            if bound.is_empty() {
                continue;
            }
            if bound.iter().all(|c| names.contains(c)) {
                emptied.push(index);
                continue;
            }
            for column in bound.into_iter().filter(|c| names.contains(c)) {
                slot.stman.remove_column(column)?;
            }
        }
        for index in emptied.into_iter().rev() {
            let slot = self.stmans.remove(index);
            tracing::info!(dir = %self.dir.display(), stman = %slot.entry.name, "Dropped storage manager without columns");
            let ctx = self.context(&slot.entry);
            self.dropped.push(ctx);
        }
        self.columns.retain(|c| !names.contains(c.name.as_str()));
        Ok(())
    }

    /// Deletes the files of dropped managers. Call only after metadata
    /// without those managers has been written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file cannot be removed; the manager stays
    /// queued.
    pub(crate) fn purge_dropped(&mut self) -> Result<()> {
        while let Some(ctx) = self.dropped.last() {
            ctx.remove_files()?;
            self.dropped.pop();
        }
        Ok(())
    }

    /// Renames a column.
    pub(crate) fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if self.columns.iter().any(|c| c.name == new) {
            return Err(Error::ColumnExists { name: new.to_string() });
        }
        let (_, stman) = self.column_mut(old)?;
        stman.rename_column(old, new)?;
        self.desc_mut(old)?.name = new.to_string();
        Ok(())
    }

    /// Flushes every manager; `true` if any of them wrote something.
    pub(crate) fn flush(&mut self, sync: bool) -> Result<bool> {
        let mut wrote = false;
        for slot in &mut self.stmans {
            wrote |= slot.stman.flush(sync)?;
        }
        Ok(wrote)
    }

    /// Brings the set in line with `meta` as written by another process.
    ///
    /// Managers that still exist are resynced, new ones are opened, and
    /// managers that were dropped are closed.
    pub(crate) fn resync(&mut self, meta: &TableMeta) -> Result<()> {
        self.nrows = meta.nrows;
        self.columns = meta.columns.clone();
        self.next_seq = meta.next_seq;
        let mut old: Vec<StManSlot> = std::mem::take(&mut self.stmans);
        for entry in &meta.stmans {
            let slot = match old.iter().position(|s| s.entry == *entry) {
                Some(position) => {
                    let mut slot = old.swap_remove(position);
                    slot.stman.resync(meta.nrows)?;
                    slot
                },
                None => self.open_manager(entry)?,
            };
            self.stmans.push(slot);
        }
        for slot in old {
            tracing::debug!(dir = %self.dir.display(), stman = %slot.entry.name, "Closed removed storage manager");
        }
        Ok(())
    }

    /// Reopens every manager for writing.
    pub(crate) fn reopen_rw(&mut self) -> Result<()> {
        for slot in &mut self.stmans {
            slot.stman.reopen_rw()?;
        }
        self.writable = true;
        Ok(())
    }

    /// Change counter of every manager, in table order.
    pub fn change_counts(&self) -> Vec<u64> {
        self.stmans.iter().map(|slot| slot.stman.change_count()).collect()
    }

    /// Bucket cache statistics per manager name.
    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        self.stmans
            .iter()
            .filter_map(|slot| slot.stman.cache_stats().map(|stats| (slot.entry.name.clone(), stats)))
            .collect()
    }

    fn default_binding(&self) -> StManBinding {
        StManBinding { type_name: self.default_stman.clone(), name: self.default_stman.clone() }
    }

    fn bind(&self, desc: &ColumnDesc) -> ColumnDesc {
        let mut bound = desc.clone();
        if bound.binding.is_none() {
            bound.binding = Some(self.default_binding());
        }
        bound
    }

    fn check_new_column(&self, desc: &ColumnDesc) -> Result<()> {
        desc.validate()?;
        if self.columns.iter().any(|c| c.name == desc.name) {
            return Err(Error::ColumnExists { name: desc.name.clone() });
        }
        Ok(())
    }

    /// A binding must not reuse an instance name with another type.
    fn check_binding(&self, desc: &ColumnDesc) -> Result<()> {
        let Some(binding) = &desc.binding else { return Ok(()) };
        let existing = self
            .stmans
            .iter()
            .map(|s| (&s.entry.name, &s.entry.type_name))
            .chain(self.columns.iter().filter_map(|c| c.binding.as_ref().map(|b| (&b.name, &b.type_name))));
        for (name, type_name) in existing {
            if *name == binding.name && *type_name != binding.type_name {
                return Err(Error::InvalidColumn {
                    name: desc.name.clone(),
                    reason: format!("storage manager {name} has type {type_name}, not {}", binding.type_name),
                });
            }
        }
        if !self.registry.contains(&binding.type_name) {
            return Err(Error::UnknownStorageManager { type_name: binding.type_name.clone() });
        }
        Ok(())
    }

    fn bound_columns(&self, stman_name: &str) -> Vec<ColumnDesc> {
        self.columns.iter().filter(|c| binding_name(c) == stman_name).cloned().collect()
    }

    fn context(&self, entry: &StManEntry) -> StManContext {
        StManContext {
            dir: self.dir.clone(),
            name: entry.name.clone(),
            seq: entry.seq,
            storage: self.storage.clone(),
            writable: self.writable,
            nrows: self.nrows,
        }
    }

    fn create_manager(&mut self, binding: &StManBinding, columns: &[ColumnDesc]) -> Result<()> {
        let entry = StManEntry { type_name: binding.type_name.clone(), name: binding.name.clone(), seq: self.next_seq };
        let stman = self.registry.create(&entry.type_name, &self.context(&entry), columns)?;
        tracing::debug!(
            dir = %self.dir.display(),
            stman = %entry.name,
            seq = entry.seq,
            columns = columns.len(),
            "Created storage manager"
        );
        self.next_seq += 1;
        self.stmans.push(StManSlot { entry, stman });
        Ok(())
    }

    fn open_manager(&self, entry: &StManEntry) -> Result<StManSlot> {
        let columns = self.bound_columns(&entry.name);
        let stman = self.registry.open(&entry.type_name, &self.context(entry), &columns)?;
        Ok(StManSlot { entry: entry.clone(), stman })
    }

}

fn binding_name(desc: &ColumnDesc) -> &str {
    desc.binding.as_ref().map_or("", |b| b.name.as_str())
}
