//! The table metadata file (`table.dat`).
//!
//! ```text
//! 0..8    magic "CTTABLE\0"
//! 8..12   format version (big-endian u32)
//! 12..16  reserved
//! 16..24  payload length (big-endian u64)
//! 24..32  xxh3 of the payload (big-endian u64)
//! 32..    postcard-encoded TableMeta
//! ```
//!
//! The file is replaced atomically: it is written under a temporary name
//! and renamed over the old one.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, ByteOrder};
use coltable_types::{Keywords, codec};
use serde::{Deserialize, Serialize};

use crate::{
    column::ColumnDesc,
    error::{Error, Result},
};

/// Name of the metadata file inside the table directory.
pub const META_FILE: &str = "table.dat";

const META_TMP_FILE: &str = "table.dat.tmp";
const META_MAGIC: &[u8; 8] = b"CTTABLE\0";
const META_VERSION: u32 = 1;
const META_HEADER_SIZE: usize = 32;

/// A storage manager instance of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StManEntry {
    /// Registered type name.
    pub type_name: String,
    /// Instance name, unique within the table.
    pub name: String,
    /// Sequence number naming the manager's files.
    pub seq: u32,
}

/// Persisted description of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Number of rows.
    pub nrows: u64,
    /// Columns in table order, each bound to a manager in `stmans`.
    pub columns: Vec<ColumnDesc>,
    /// Storage manager instances.
    pub stmans: Vec<StManEntry>,
    /// Table keywords.
    pub keywords: Keywords,
    /// Number of modifications made to the table.
    pub modify_count: u64,
    /// Sequence number for the next storage manager.
    pub next_seq: u32,
}

impl TableMeta {
    /// Path of the metadata file of the table in `dir`.
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(META_FILE)
    }

    /// Returns `true` if `dir` holds a table.
    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    /// Reads the metadata of the table in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a corruption
    /// error if it is malformed.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let bytes = fs::read(&path).map_err(|source| Error::FileIo { path: path.clone(), source })?;
        let name = path.display().to_string();
        if bytes.len() < META_HEADER_SIZE {
            return Err(Error::ShortRead { name, expected: META_HEADER_SIZE, actual: bytes.len() });
        }
        if &bytes[0..8] != META_MAGIC {
            return Err(Error::Corrupted { name, reason: "bad magic".to_string() });
        }
        let version = BigEndian::read_u32(&bytes[8..12]);
        if version != META_VERSION {
            return Err(Error::UnsupportedVersion { name, version });
        }
        let len = BigEndian::read_u64(&bytes[16..24]) as usize;
        let payload = &bytes[META_HEADER_SIZE..];
        if payload.len() != len {
            return Err(Error::ShortRead { name, expected: len, actual: payload.len() });
        }
        if BigEndian::read_u64(&bytes[24..32]) != xxhash_rust::xxh3::xxh3_64(payload) {
            return Err(Error::HeaderChecksumMismatch { name });
        }
        Ok(codec::decode(payload)?)
    }

    /// Writes the metadata of the table in `dir`, forcing it to disk if
    /// `sync` is set.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write(&self, dir: &Path, sync: bool) -> Result<()> {
        let payload = codec::encode(self)?;
        let mut bytes = vec![0u8; META_HEADER_SIZE];
        bytes[0..8].copy_from_slice(META_MAGIC);
        BigEndian::write_u32(&mut bytes[8..12], META_VERSION);
        BigEndian::write_u64(&mut bytes[16..24], payload.len() as u64);
        BigEndian::write_u64(&mut bytes[24..32], xxhash_rust::xxh3::xxh3_64(&payload));
        bytes.extend_from_slice(&payload);

        let tmp = dir.join(META_TMP_FILE);
        let io_error = |source| Error::FileIo { path: tmp.clone(), source };
        let mut file = fs::File::create(&tmp).map_err(io_error)?;
        file.write_all(&bytes).map_err(io_error)?;
        if sync {
            file.sync_data().map_err(io_error)?;
        }
        drop(file);
        let path = Self::path(dir);
        fs::rename(&tmp, &path).map_err(|source| Error::FileIo { path, source })?;
        tracing::debug!(dir = %dir.display(), nrows = self.nrows, columns = self.columns.len(), "Wrote table metadata");
        Ok(())
    }
}
