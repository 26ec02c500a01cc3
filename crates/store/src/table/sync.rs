//! Synchronization record exchanged through the lock file.
//!
//! A process releasing a write lock stores the state of the table in the
//! lock file's info blob. The next process to acquire the lock compares it
//! with its own view and resyncs when they differ.

use coltable_types::codec;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// State of a table as last written by a lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncData {
    /// Number of rows.
    pub nrows: u64,
    /// Number of columns.
    pub ncolumns: u32,
    /// Modification counter of the table.
    pub modify_count: u64,
    /// Change counter of each storage manager, in table order.
    pub stman_changes: Vec<u64>,
}

impl SyncData {
    /// Encodes the record for the lock file.
    ///
    /// # Errors
    ///
    /// Returns a codec error if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(codec::encode(self)?)
    }

    /// Decodes a record read from the lock file; `None` if no record has
    /// been written yet.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the blob is malformed.
    pub fn decode(blob: &[u8]) -> Result<Option<Self>> {
        if blob.is_empty() {
            return Ok(None);
        }
        Ok(Some(codec::decode(blob)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_blob_is_none() {
        assert_eq!(SyncData::decode(&[]).unwrap(), None);
    }

    #[test]
    fn test_encode_decode() {
        let data = SyncData { nrows: 12, ncolumns: 3, modify_count: 40, stman_changes: vec![2, 0] };
        let blob = data.encode().unwrap();
        assert!(!blob.is_empty());
        assert_eq!(SyncData::decode(&blob).unwrap(), Some(data));
    }

    #[test]
    fn test_garbage_blob() {
        assert!(SyncData::decode(&[0xff; 3]).is_err());
    }
}
