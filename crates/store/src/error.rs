//! Error types for the coltable storage engine.
//!
//! Every error belongs to one of three classes (see [`ErrorKind`]): I/O
//! failures, which are fatal for the operation; checked invariant
//! violations, which leave the table untouched and can be retried with other
//! arguments; and corruption of persisted data.

use std::{io, path::PathBuf};

use coltable_types::{ArrayError, DataType, Shape, codec::CodecError, config::ConfigError};
use snafu::Snafu;

/// Bucket number inside a bucket file.
pub type BucketId = u64;

/// Row number inside a table.
pub type RowId = u64;

/// Result type alias for storage engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Underlying I/O failed; never retried automatically.
    Io,
    /// A checked invariant was violated; nothing was modified.
    Checked,
    /// Persisted data is malformed.
    Corruption,
}

/// Errors that can occur during storage engine operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying file system.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// I/O error on a named file.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    FileIo {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A write could not be completed.
    #[snafu(display("write error for file {name}: {source}"), visibility(pub(crate)))]
    ShortWrite {
        /// Name of the stream.
        name: String,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A mandatory read returned fewer bytes than requested.
    #[snafu(display("read error for file {name}: expected {expected} bytes, got {actual}"))]
    ShortRead {
        /// Name of the stream.
        name: String,
        /// Bytes requested.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// The stream does not support the requested operation.
    #[snafu(display("stream {name} is not {operation}"))]
    StreamCapability {
        /// Name of the stream.
        name: String,
        /// Missing capability (`readable`, `writable`, `seekable`).
        operation: &'static str,
    },

    /// A persisted structure is malformed.
    #[snafu(display("corrupted file {name}: {reason}"))]
    Corrupted {
        /// Name of the file.
        name: String,
        /// Description of what was corrupted.
        reason: String,
    },

    /// A file header checksum did not verify.
    #[snafu(display("header checksum mismatch in {name}"))]
    HeaderChecksumMismatch {
        /// Name of the file.
        name: String,
    },

    /// Unsupported on-disk format version.
    #[snafu(display("unsupported format version {version} in {name}"))]
    UnsupportedVersion {
        /// Name of the file.
        name: String,
        /// The version found.
        version: u32,
    },

    /// Metadata could not be encoded or decoded.
    #[snafu(display("metadata codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
    },

    /// An array or value operation failed.
    #[snafu(display("{source}"))]
    Array {
        /// The underlying array error.
        source: ArrayError,
    },

    /// Invalid configuration.
    #[snafu(display("{source}"))]
    Config {
        /// The underlying configuration error.
        source: ConfigError,
    },

    /// Row number outside the table.
    #[snafu(display("row {row} out of range (table has {nrows} rows)"))]
    RowOutOfRange {
        /// The requested row.
        row: RowId,
        /// Number of rows in the table.
        nrows: u64,
    },

    /// An array shape does not match the column or cell shape.
    #[snafu(display("shape mismatch in column {column} row {row}: expected {expected}, found {found}"))]
    ShapeMismatch {
        /// Column name.
        column: String,
        /// Row number.
        row: RowId,
        /// Expected shape.
        expected: Shape,
        /// Shape supplied.
        found: Shape,
    },

    /// A slice was requested for a cell that has no array.
    #[snafu(display("no array in row {row} of column {column}"))]
    NoArray {
        /// Column name.
        column: String,
        /// Row number.
        row: RowId,
    },

    /// The heap has no array at the given offset.
    #[snafu(display("no array at heap offset {offset}"))]
    NoHeapArray {
        /// The heap offset.
        offset: u64,
    },

    /// Column element type differs from the supplied value.
    #[snafu(display("column {column} holds {expected}, got {found}"))]
    ColumnTypeMismatch {
        /// Column name.
        column: String,
        /// The column's data type.
        expected: DataType,
        /// The supplied data type.
        found: DataType,
    },

    /// Operation not supported for this kind of column.
    #[snafu(display("column {column} does not support {operation}"))]
    UnsupportedOperation {
        /// Column name.
        column: String,
        /// Operation attempted.
        operation: &'static str,
    },

    /// No column with this name.
    #[snafu(display("no column named {name}"))]
    NoSuchColumn {
        /// Column name.
        name: String,
    },

    /// A column with this name already exists.
    #[snafu(display("column {name} already exists"))]
    ColumnExists {
        /// Column name.
        name: String,
    },

    /// A column description is invalid.
    #[snafu(display("invalid column {name}: {reason}"))]
    InvalidColumn {
        /// Column name.
        name: String,
        /// What is wrong.
        reason: String,
    },

    /// A storage manager refused to remove a column.
    #[snafu(display("cannot remove column {name}: {reason}"))]
    CannotRemoveColumn {
        /// Column name.
        name: String,
        /// Why it cannot be removed.
        reason: String,
    },

    /// The table or stream is opened read-only.
    #[snafu(display("{name} is not writable"))]
    NotWritable {
        /// Table or file name.
        name: String,
    },

    /// No storage manager registered under this type name.
    #[snafu(display("unknown storage manager type {type_name}"))]
    UnknownStorageManager {
        /// The type name.
        type_name: String,
    },

    /// A table already exists at this path.
    #[snafu(display("table {} already exists", path.display()))]
    TableExists {
        /// Table directory.
        path: PathBuf,
    },

    /// The lock could not be acquired within the attempt budget.
    #[snafu(display("table {} is locked by another process", path.display()))]
    TableBusy {
        /// Lock file path.
        path: PathBuf,
    },

    /// A user-locked table was modified without holding the write lock.
    #[snafu(display("table {} is not locked for writing", path.display()))]
    NotLocked {
        /// Table directory.
        path: PathBuf,
    },

    /// Bucket number beyond the end of the bucket file.
    #[snafu(display("bucket {bucket} out of range ({nr_buckets} buckets)"))]
    BucketOutOfRange {
        /// The requested bucket.
        bucket: BucketId,
        /// Number of buckets in the file.
        nr_buckets: u64,
    },
}

impl Error {
    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. }
            | Error::FileIo { .. }
            | Error::ShortWrite { .. }
            | Error::ShortRead { .. }
            | Error::StreamCapability { .. } => ErrorKind::Io,
            Error::Corrupted { .. }
            | Error::HeaderChecksumMismatch { .. }
            | Error::UnsupportedVersion { .. }
            | Error::Codec { .. }
            | Error::BucketOutOfRange { .. } => ErrorKind::Corruption,
            Error::Array { .. }
            | Error::Config { .. }
            | Error::RowOutOfRange { .. }
            | Error::ShapeMismatch { .. }
            | Error::NoArray { .. }
            | Error::NoHeapArray { .. }
            | Error::ColumnTypeMismatch { .. }
            | Error::UnsupportedOperation { .. }
            | Error::NoSuchColumn { .. }
            | Error::ColumnExists { .. }
            | Error::InvalidColumn { .. }
            | Error::CannotRemoveColumn { .. }
            | Error::NotWritable { .. }
            | Error::UnknownStorageManager { .. }
            | Error::TableExists { .. }
            | Error::TableBusy { .. }
            | Error::NotLocked { .. } => ErrorKind::Checked,
        }
    }

    /// Returns `true` for checked invariant violations.
    pub fn is_checked(&self) -> bool {
        self.kind() == ErrorKind::Checked
    }
}

// Provide automatic conversion from io::Error to Error::Io for ergonomic ? usage
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<CodecError> for Error {
    fn from(source: CodecError) -> Self {
        Error::Codec { source }
    }
}

impl From<ArrayError> for Error {
    fn from(source: ArrayError) -> Self {
        Error::Array { source }
    }
}

impl From<ConfigError> for Error {
    fn from(source: ConfigError) -> Self {
        Error::Config { source }
    }
}
