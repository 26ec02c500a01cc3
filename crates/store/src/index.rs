//! Row index: placement of rows and columns inside buckets.
//!
//! Columns of a storage manager are grouped into indices. Every row of the
//! table has a slot of `stride` bytes in some bucket of each index; a
//! column's cell sits at a fixed offset inside that slot. Consecutive rows
//! are stored in consecutive slots, so an index is a list of row ranges,
//! each mapping a contiguous run of rows onto the leading slots of one
//! bucket.

use serde::{Deserialize, Serialize};

use crate::error::{BucketId, Result, RowId};

/// A contiguous run of rows stored in one bucket.
///
/// The run starts where the previous range ends (at row 0 for the first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    /// One past the last row of the range.
    pub end: RowId,
    /// Bucket holding the rows.
    pub bucket: BucketId,
}

/// Position of a column's cells within a row slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSlot {
    /// Column name.
    pub column: String,
    /// Byte offset within the row slot.
    pub offset: usize,
    /// Cell width in bytes.
    pub width: usize,
}

/// Where a row lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    /// Bucket holding the row.
    pub bucket: BucketId,
    /// Slot of the row within the bucket.
    pub slot: u64,
    /// Number of rows stored in the bucket.
    pub rows_in_bucket: u64,
}

impl RowLocation {
    /// Byte offset of the row's slot within its bucket.
    pub fn byte_offset(&self, stride: usize) -> usize {
        self.slot as usize * stride
    }
}

/// Outcome of removing a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedRow {
    /// Where the row was.
    pub location: RowLocation,
    /// The bucket, if the row was the last one in it and it is now unused.
    pub freed: Option<BucketId>,
}

/// Row-to-bucket map of one group of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIndex {
    bucket_size: usize,
    stride: usize,
    slots: Vec<ColumnSlot>,
    ranges: Vec<RowRange>,
}

impl RowIndex {
    /// Creates an empty index whose row slots are `stride` bytes.
    pub fn new(bucket_size: usize, stride: usize) -> Self {
        Self { bucket_size, stride: stride.clamp(1, bucket_size.max(1)), slots: Vec::new(), ranges: Vec::new() }
    }

    /// Size of a row slot in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of rows stored per bucket.
    pub fn rows_per_bucket(&self) -> u64 {
        (self.bucket_size / self.stride) as u64
    }

    /// Number of rows covered.
    pub fn nrows(&self) -> u64 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// The row ranges, in row order.
    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    /// The buckets in use, in row order.
    pub fn buckets(&self) -> impl Iterator<Item = BucketId> + '_ {
        self.ranges.iter().map(|r| r.bucket)
    }

    /// The column slots.
    pub fn slots(&self) -> &[ColumnSlot] {
        &self.slots
    }

    /// Returns `true` if no column is placed in this index.
    pub fn has_no_columns(&self) -> bool {
        self.slots.is_empty()
    }

    /// Looks up a column's slot.
    pub fn slot(&self, column: &str) -> Option<&ColumnSlot> {
        self.slots.iter().find(|s| s.column == column)
    }

    /// Finds a free byte range of `width` bytes in the row slot.
    pub fn find_space(&self, width: usize) -> Option<usize> {
        let mut taken: Vec<(usize, usize)> =
            self.slots.iter().map(|s| (s.offset, s.offset + s.width)).collect();
        taken.sort_unstable();
        let mut candidate = 0;
        for (start, end) in taken {
            if start >= candidate + width {
                break;
            }
            candidate = candidate.max(end);
        }
        (candidate + width <= self.stride).then_some(candidate)
    }

    /// Places a column at `offset`.
    pub fn place(&mut self, column: impl Into<String>, offset: usize, width: usize) {
        self.slots.push(ColumnSlot { column: column.into(), offset, width });
    }

    /// Removes a column's slot, leaving its bytes unused.
    pub fn remove_slot(&mut self, column: &str) -> Option<ColumnSlot> {
        let pos = self.slots.iter().position(|s| s.column == column)?;
        Some(self.slots.remove(pos))
    }

    /// Renames a column's slot.
    pub fn rename_slot(&mut self, old: &str, new: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.column == old) {
            slot.column = new.to_string();
        }
    }

    /// Locates a row.
    pub fn find(&self, row: RowId) -> Option<RowLocation> {
        let i = self.ranges.partition_point(|r| r.end <= row);
        let range = self.ranges.get(i)?;
        let start = self.range_start(i);
        Some(RowLocation { bucket: range.bucket, slot: row - start, rows_in_bucket: range.end - start })
    }

    fn range_start(&self, i: usize) -> RowId {
        if i == 0 { 0 } else { self.ranges[i - 1].end }
    }

    /// Appends `count` rows: the last bucket is filled first, then buckets
    /// are obtained from `allocate`.
    ///
    /// Returns the newly used buckets.
    ///
    /// # Errors
    ///
    /// Propagates errors from `allocate`; rows placed before the failure
    /// remain.
    pub fn add_rows(
        &mut self,
        count: u64,
        mut allocate: impl FnMut() -> Result<BucketId>,
    ) -> Result<Vec<BucketId>> {
        let per_bucket = self.rows_per_bucket();
        let mut remaining = count;
        if let Some(i) = self.ranges.len().checked_sub(1) {
            let used = self.ranges[i].end - self.range_start(i);
            let fill = (per_bucket - used.min(per_bucket)).min(remaining);
            self.ranges[i].end += fill;
            remaining -= fill;
        }
        let mut added = Vec::new();
        while remaining > 0 {
            let bucket = allocate()?;
            let fill = per_bucket.min(remaining);
            let end = self.nrows() + fill;
            self.ranges.push(RowRange { end, bucket });
            added.push(bucket);
            remaining -= fill;
        }
        Ok(added)
    }

    /// Removes a row; later rows shift down by one.
    ///
    /// The caller moves the bytes of the following rows in the bucket. A
    /// bucket left without rows is dropped from the index and returned.
    pub fn remove_row(&mut self, row: RowId) -> Option<RemovedRow> {
        let location = self.find(row)?;
        let i = self.ranges.partition_point(|r| r.end <= row);
        for range in &mut self.ranges[i..] {
            range.end -= 1;
        }
        let freed = if location.rows_in_bucket == 1 {
            self.ranges.remove(i);
            Some(location.bucket)
        } else {
            None
        };
        Some(RemovedRow { location, freed })
    }

    /// Checks that the ranges are non-empty, fit their buckets, and exactly
    /// cover `[0, nrows)`.
    pub fn check_coverage(&self, nrows: u64) -> bool {
        let per_bucket = self.rows_per_bucket();
        let mut start = 0;
        for range in &self.ranges {
            if range.end <= start || range.end - start > per_bucket {
                return false;
            }
            start = range.end;
        }
        start == nrows
    }
}
