//! coltable-store: a self-describing columnar table storage engine.
//!
//! A table is a directory of files holding named, typed columns:
//!
//! - **Scalar columns**: one fixed-size value per row
//! - **Fixed-shape array columns**: the same array shape in every row, stored inline
//! - **Variable-shape array columns**: per-row shapes, stored in an array heap
//!   with persisted reference counts
//! - **Pluggable storage managers**: created by type name through an explicit
//!   registry
//! - **Cooperative locking**: byte-range locks on a small control file, with a
//!   pending-request list and a synchronization record for multi-process use
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  Table API                   │
//! │  (rows, columns, cells, keywords, locking)   │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │          ColumnSet + StorageManager          │
//! │    (StandardStMan, MemoryStMan, registry)    │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │        Row index          Array heap         │
//! │  (row → bucket + slot)  (refcounted records) │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │          Bucket file + LRU bucket cache      │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │                 Byte I/O                     │
//! │            (FileIo / MemoryIo)               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use coltable_store::{ColumnDesc, Table, TableOptions};
//! use coltable_types::{ArrayValue, DataType, config::{LockConfig, LockMode}};
//!
//! let lock = LockConfig::builder().mode(LockMode::Permanent).build()?;
//! let options = TableOptions::builder().lock(lock).build();
//! let columns = [
//!     ColumnDesc::fixed_array("ints", DataType::Int32, [4]),
//!     ColumnDesc::variable_array("spectrum", DataType::Float64),
//! ];
//! let mut table = Table::create("demo.tab", &columns, options)?;
//! table.add_row(3)?;
//! table.put_array("ints", 0, &ArrayValue::from_vec(vec![1_i32, 2, 3, 4]))?;
//! let spectrum = table.get_array("spectrum", 0)?;
//! assert!(spectrum.is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// Test code style - allow field reassignment after default
#![cfg_attr(test, allow(clippy::field_reassign_with_default))]

pub mod bucket;
pub mod column;
pub mod error;
pub mod heap;
pub mod index;
pub mod io;
pub mod lock;
pub mod stman;
pub mod table;

// Re-export commonly used types
pub use bucket::{BucketAllocator, BucketCache, BucketCallbacks, BucketFile, CacheStats, RawBuckets};
pub use column::{ColumnDesc, ColumnKind, StManBinding};
pub use error::{BucketId, Error, ErrorKind, Result, RowId};
pub use heap::{HeapDescriptor, HeapFile};
pub use index::{ColumnSlot, RowIndex, RowRange};
pub use io::{ByteIo, FileIo, MemoryIo, SharedBuffer};
pub use lock::{LockFile, LockRequest, LockType};
pub use stman::{MemoryStMan, StManContext, StManRegistry, StandardStMan, StorageManager};
pub use table::{ColumnSet, SyncData, Table, TableMeta, TableOptions};
