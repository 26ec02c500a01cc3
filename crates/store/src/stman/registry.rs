//! Registry of storage manager types.

use std::collections::BTreeMap;

use super::{MemoryStMan, StManContext, StandardStMan, StorageManager};
use crate::{
    column::ColumnDesc,
    error::{Error, Result},
};

/// Creates a new manager instance holding `columns`.
pub type CreateFn = fn(&StManContext, &[ColumnDesc]) -> Result<Box<dyn StorageManager>>;

/// Opens an existing manager instance that holds `columns`.
pub type OpenFn = fn(&StManContext, &[ColumnDesc]) -> Result<Box<dyn StorageManager>>;

#[derive(Debug, Clone, Copy)]
struct Constructors {
    create: CreateFn,
    open: OpenFn,
}

/// Maps storage manager type names to their constructors.
///
/// Tables look managers up here when they are created or opened, so a
/// table can only be opened with a registry that knows every manager type
/// it uses.
#[derive(Debug, Clone, Default)]
pub struct StManRegistry {
    types: BTreeMap<String, Constructors>,
}

impl StManRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in managers ([`StandardStMan`] and
    /// [`MemoryStMan`]).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StandardStMan::TYPE_NAME, StandardStMan::create_boxed, StandardStMan::open_boxed);
        registry.register(MemoryStMan::TYPE_NAME, MemoryStMan::create_boxed, MemoryStMan::open_boxed);
        registry
    }

    /// Registers a manager type, replacing an earlier registration of the
    /// same name.
    pub fn register(&mut self, type_name: impl Into<String>, create: CreateFn, open: OpenFn) {
        self.types.insert(type_name.into(), Constructors { create, open });
    }

    /// Returns `true` if `type_name` is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    fn constructors(&self, type_name: &str) -> Result<Constructors> {
        self.types
            .get(type_name)
            .copied()
            .ok_or_else(|| Error::UnknownStorageManager { type_name: type_name.to_string() })
    }

    /// Creates a manager of `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStorageManager`] for an unregistered type, or
    /// the manager's own creation error.
    pub fn create(
        &self,
        type_name: &str,
        ctx: &StManContext,
        columns: &[ColumnDesc],
    ) -> Result<Box<dyn StorageManager>> {
        (self.constructors(type_name)?.create)(ctx, columns)
    }

    /// Opens a manager of `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStorageManager`] for an unregistered type, or
    /// the manager's own open error.
    pub fn open(
        &self,
        type_name: &str,
        ctx: &StManContext,
        columns: &[ColumnDesc],
    ) -> Result<Box<dyn StorageManager>> {
        (self.constructors(type_name)?.open)(ctx, columns)
    }
}
