//! Temporary table directories for tests.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

/// A temporary directory holding test tables, removed on drop.
///
/// # Example
///
/// ```
/// use coltable_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let table_path = dir.join("obs.tab");
/// // Create a table at table_path...
/// // Directory cleaned up when `dir` goes out of scope
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Path of the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Reads every file of the table directory `name` into memory, keyed by
    /// file name.
    ///
    /// Used to compare the on-disk state of a table before and after an
    /// operation.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be read.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> BTreeMap<String, Vec<u8>> {
        let dir = self.join(name);
        std::fs::read_dir(&dir)
            .expect("failed to read table directory")
            .map(|entry| {
                let entry = entry.expect("failed to read directory entry");
                let bytes = std::fs::read(entry.path()).expect("failed to read table file");
                (entry.file_name().to_string_lossy().into_owned(), bytes)
            })
            .collect()
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
