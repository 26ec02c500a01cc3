//! Bucket-based storage manager.
//!
//! `StandardStMan` keeps the cells of its columns in a bucket file
//! (`table.f<seq>`) and the variable-shaped arrays in a heap file
//! (`table.f<seq>i`, created on first use).
//!
//! Columns are grouped into indices (see [`RowIndex`]); every row has a slot
//! in one bucket of each index. Scalar cells hold the value, fixed-shape
//! array cells a defined flag followed by the elements, and variable-shaped
//! array cells the heap offset of their array.
//!
//! # File layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     Magic "CTSSM\0\0\0"
//! 8       4     Format version
//! 12      1     Byte order tag ('B' or 'L')
//! 16      8     Bucket size
//! 24      8     Number of buckets
//! 32      8     Number of rows
//! 40      8     Length of the layout record
//! 48      8     First bucket of the layout chain
//! 56      8     XXH3-64 checksum of bytes 0..56
//! 512     ...   Buckets
//! ```
//!
//! The layout record (columns, indices, free list) is postcard-encoded and
//! stored in a chain of buckets whose first 8 bytes link to the next one.

use std::path::{Path, PathBuf};

use coltable_types::{ArrayValue, Endian, Shape, Slicer, Value, codec};
use serde::{Deserialize, Serialize};

use super::{StManContext, StorageManager, check_row};
use crate::{
    bucket::{BucketAllocator, BucketCache, BucketFile, CacheStats, RawBuckets},
    column::{ColumnDesc, ColumnKind},
    error::{BucketId, Error, Result, RowId},
    heap::HeapFile,
    index::RowIndex,
    io::{ByteIo, FileIo},
};

/// Magic number of bucket files.
pub const SSM_MAGIC: &[u8; 8] = b"CTSSM\0\0\0";

/// Current bucket file format version.
pub const SSM_VERSION: u32 = 1;

/// Size of the header area before the first bucket.
pub const SSM_HEADER_SIZE: u64 = 512;

const HEADER_CHECKSUMMED: usize = 56;
const NO_BUCKET: BucketId = u64::MAX;
const CHAIN_LINK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    endian: Endian,
    bucket_size: u64,
    nr_buckets: u64,
    nrows: u64,
    layout_len: u64,
    layout_first: BucketId,
}

impl Header {
    fn to_bytes(self) -> Vec<u8> {
        let e = self.endian;
        let mut buf = vec![0u8; SSM_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(SSM_MAGIC);
        e.write_u32(&mut buf[8..12], SSM_VERSION);
        buf[12] = e.to_tag();
        e.write_u64(&mut buf[16..24], self.bucket_size);
        e.write_u64(&mut buf[24..32], self.nr_buckets);
        e.write_u64(&mut buf[32..40], self.nrows);
        e.write_u64(&mut buf[40..48], self.layout_len);
        e.write_u64(&mut buf[48..56], self.layout_first);
        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[0..HEADER_CHECKSUMMED]);
        e.write_u64(&mut buf[56..64], checksum);
        buf
    }

    fn from_bytes(name: &str, buf: &[u8]) -> Result<Self> {
        let corrupted = |reason: &str| Error::Corrupted { name: name.to_string(), reason: reason.to_string() };
        if &buf[0..8] != SSM_MAGIC {
            return Err(corrupted("invalid magic"));
        }
        let e = Endian::from_tag(buf[12]).ok_or_else(|| corrupted("invalid byte order tag"))?;
        if e.read_u64(&buf[56..64]) != xxhash_rust::xxh3::xxh3_64(&buf[0..HEADER_CHECKSUMMED]) {
            return Err(Error::HeaderChecksumMismatch { name: name.to_string() });
        }
        let version = e.read_u32(&buf[8..12]);
        if version != SSM_VERSION {
            return Err(Error::UnsupportedVersion { name: name.to_string(), version });
        }
        Ok(Self {
            endian: e,
            bucket_size: e.read_u64(&buf[16..24]),
            nr_buckets: e.read_u64(&buf[24..32]),
            nrows: e.read_u64(&buf[32..40]),
            layout_len: e.read_u64(&buf[40..48]),
            layout_first: e.read_u64(&buf[48..56]),
        })
    }
}

/// A column and the index holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnEntry {
    desc: ColumnDesc,
    index: usize,
}

/// Persisted layout record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layout {
    columns: Vec<ColumnEntry>,
    indices: Vec<RowIndex>,
    free_buckets: Vec<BucketId>,
    has_heap: bool,
    change_count: u64,
}

/// Where a cell lives.
#[derive(Debug, Clone, Copy)]
struct CellRef {
    /// Position in `columns`.
    entry: usize,
    bucket: BucketId,
    /// Byte offset in the bucket.
    offset: usize,
    width: usize,
}

/// Storage manager keeping its columns in a bucket file.
#[derive(Debug)]
pub struct StandardStMan {
    name: String,
    path: PathBuf,
    heap_path: PathBuf,
    config: coltable_types::config::StorageConfig,
    endian: Endian,
    writable: bool,
    nrows: u64,
    cache: BucketCache<Vec<u8>, RawBuckets>,
    heap: Option<HeapFile>,
    columns: Vec<ColumnEntry>,
    indices: Vec<RowIndex>,
    /// Buckets holding the layout record.
    layout_chain: Vec<BucketId>,
    change_count: u64,
    layout_dirty: bool,
}

impl StandardStMan {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "StandardStMan";

    /// Creates the manager's bucket file holding `columns`, with
    /// `ctx.nrows` rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidColumn`] if a cell does not fit a bucket, or
    /// an I/O error if the file cannot be created.
    pub fn create(ctx: &StManContext, columns: &[ColumnDesc]) -> Result<Self> {
        let path = ctx.file_path("");
        let io = FileIo::create(&path, ctx.storage.io_buffer_size)?;
        let file = BucketFile::new(Box::new(io), SSM_HEADER_SIZE, ctx.storage.bucket_size);
        let cache = BucketCache::new(file, RawBuckets, BucketAllocator::default(), ctx.storage.cache_size);
        let mut stman = Self {
            name: ctx.name.clone(),
            heap_path: ctx.file_path("i"),
            path,
            config: ctx.storage.clone(),
            endian: ctx.storage.byte_order,
            writable: true,
            nrows: 0,
            cache,
            heap: None,
            columns: Vec::new(),
            indices: Vec::new(),
            layout_chain: Vec::new(),
            change_count: 0,
            layout_dirty: true,
        };
        stman.pack_columns(columns)?;
        stman.add_rows(ctx.nrows)?;
        stman.change_count = 0;
        stman.flush(false)?;
        tracing::debug!(path = %stman.path.display(), columns = columns.len(), "Created bucket file");
        Ok(stman)
    }

    /// Opens an existing bucket file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed, or
    /// [`Error::Corrupted`] if it does not hold every column in `columns`.
    pub fn open(ctx: &StManContext, columns: &[ColumnDesc]) -> Result<Self> {
        let path = ctx.file_path("");
        let mut io = FileIo::open(&path, ctx.writable, ctx.storage.io_buffer_size)?;
        let name = io.name().to_string();
        let mut header_buf = vec![0u8; SSM_HEADER_SIZE as usize];
        io.read_exact_at(0, &mut header_buf)?;
        let header = Header::from_bytes(&name, &header_buf)?;
        // The bucket size of the file wins over the configured one.
        let bucket_size = usize::try_from(header.bucket_size).map_err(|_| Error::Corrupted {
            name: name.clone(),
            reason: format!("bucket size {} too large", header.bucket_size),
        })?;
        let mut file = BucketFile::new(Box::new(io), SSM_HEADER_SIZE, bucket_size);
        let (layout, chain) = read_layout(&mut file, &header)?;
        for desc in columns {
            if !layout.columns.iter().any(|c| c.desc.name == desc.name) {
                return Err(Error::Corrupted { name, reason: format!("column {} not found", desc.name) });
            }
        }
        let allocator = BucketAllocator::new(header.nr_buckets, layout.free_buckets.clone());
        let cache = BucketCache::new(file, RawBuckets, allocator, ctx.storage.cache_size);
        let heap_path = ctx.file_path("i");
        let heap = if layout.has_heap {
            Some(HeapFile::open(Box::new(FileIo::open(&heap_path, ctx.writable, ctx.storage.io_buffer_size)?))?)
        } else {
            None
        };
        let mut config = ctx.storage.clone();
        config.bucket_size = bucket_size;
        config.byte_order = header.endian;
        tracing::debug!(path = %path.display(), nrows = header.nrows, "Opened bucket file");
        Ok(Self {
            name: ctx.name.clone(),
            path,
            heap_path,
            config,
            endian: header.endian,
            writable: ctx.writable,
            nrows: header.nrows,
            cache,
            heap,
            columns: layout.columns,
            indices: layout.indices,
            layout_chain: chain,
            change_count: layout.change_count,
            layout_dirty: false,
        })
    }

    pub(crate) fn create_boxed(ctx: &StManContext, columns: &[ColumnDesc]) -> Result<Box<dyn StorageManager>> {
        Ok(Box::new(Self::create(ctx, columns)?))
    }

    pub(crate) fn open_boxed(ctx: &StManContext, columns: &[ColumnDesc]) -> Result<Box<dyn StorageManager>> {
        Ok(Box::new(Self::open(ctx, columns)?))
    }

    /// Path of the bucket file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte order of the stored values.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Number of row indices (column groups).
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Row index holding `column`.
    pub fn index_of(&self, column: &str) -> Option<&RowIndex> {
        let entry = self.columns.iter().find(|c| c.desc.name == column)?;
        self.indices.get(entry.index)
    }

    /// Number of bucket slots in the file.
    pub fn nr_buckets(&self) -> u64 {
        self.cache.nr_buckets()
    }

    /// Buckets on the free list.
    pub fn free_buckets(&self) -> &[BucketId] {
        self.cache.free_list()
    }

    /// The array heap, if it has been created.
    pub fn heap(&self) -> Option<&HeapFile> {
        self.heap.as_ref()
    }

    /// Changes the number of buckets the cache may hold.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing an evicted bucket fails.
    pub fn resize_cache(&mut self, capacity: usize) -> Result<()> {
        self.cache.resize(capacity)
    }

    /// Writes dirty buckets and empties the cache.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    pub fn clear_cache(&mut self) -> Result<()> {
        self.cache.clear()
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable { Ok(()) } else { Err(Error::NotWritable { name: self.path.display().to_string() }) }
    }

    fn check_width(&self, desc: &ColumnDesc) -> Result<usize> {
        let width = desc.cell_width();
        if width > self.config.bucket_size {
            return Err(Error::InvalidColumn {
                name: desc.name.clone(),
                reason: format!("cell of {width} bytes does not fit a bucket of {} bytes", self.config.bucket_size),
            });
        }
        Ok(width)
    }

    fn check_new_column(&self, desc: &ColumnDesc) -> Result<usize> {
        desc.validate()?;
        if self.columns.iter().any(|c| c.desc.name == desc.name) {
            return Err(Error::ColumnExists { name: desc.name.clone() });
        }
        self.check_width(desc)
    }

    /// Stride of a new index whose cells take `width` bytes.
    fn new_stride(&self, width: usize) -> usize {
        (width + self.config.reserved_row_bytes).min(self.config.bucket_size)
    }

    /// Groups the initial columns greedily into as few indices as fit a
    /// bucket.
    fn pack_columns(&mut self, columns: &[ColumnDesc]) -> Result<()> {
        let mut groups: Vec<(Vec<(&ColumnDesc, usize)>, usize)> = Vec::new();
        for desc in columns {
            let width = self.check_new_column(desc)?;
            if columns.iter().filter(|c| c.name == desc.name).count() > 1 {
                return Err(Error::ColumnExists { name: desc.name.clone() });
            }
            match groups.last_mut() {
                Some((members, used)) if *used + width <= self.config.bucket_size => {
                    members.push((desc, width));
                    *used += width;
                },
                _ => groups.push((vec![(desc, width)], width)),
            }
        }
        for (members, used) in groups {
            let mut index = RowIndex::new(self.config.bucket_size, self.new_stride(used));
            let mut offset = 0;
            for (desc, width) in members {
                index.place(desc.name.clone(), offset, width);
                offset += width;
                self.columns.push(ColumnEntry { desc: desc.clone(), index: self.indices.len() });
            }
            self.indices.push(index);
        }
        Ok(())
    }

    fn entry_position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.desc.name == column)
            .ok_or_else(|| Error::NoSuchColumn { name: column.to_string() })
    }

    fn locate(&self, column: &str, row: RowId) -> Result<CellRef> {
        check_row(row, self.nrows)?;
        let entry = self.entry_position(column)?;
        let index = &self.indices[self.columns[entry].index];
        let corrupted = |reason: String| Error::Corrupted { name: self.path.display().to_string(), reason };
        let slot = index.slot(column).ok_or_else(|| corrupted(format!("column {column} has no slot")))?;
        let location = index.find(row).ok_or_else(|| corrupted(format!("row {row} not in index")))?;
        Ok(CellRef {
            entry,
            bucket: location.bucket,
            offset: location.byte_offset(index.stride()) + slot.offset,
            width: slot.width,
        })
    }

    fn desc(&self, cell: CellRef) -> &ColumnDesc {
        &self.columns[cell.entry].desc
    }

    fn read_cell(&mut self, cell: CellRef) -> Result<Vec<u8>> {
        let bucket = self.cache.get_bucket(cell.bucket)?;
        Ok(bucket[cell.offset..cell.offset + cell.width].to_vec())
    }

    fn write_cell(&mut self, cell: CellRef, at: usize, bytes: &[u8]) -> Result<()> {
        let bucket = self.cache.get_bucket_mut(cell.bucket)?;
        bucket[cell.offset + at..cell.offset + at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_pointer(&mut self, cell: CellRef) -> Result<u64> {
        let bytes = self.read_cell(cell)?;
        Ok(self.endian.read_u64(&bytes))
    }

    fn write_pointer(&mut self, cell: CellRef, offset: u64) -> Result<()> {
        let mut bytes = [0u8; 8];
        self.endian.write_u64(&mut bytes, offset);
        self.write_cell(cell, 0, &bytes)
    }

    fn heap_mut(&mut self) -> Result<&mut HeapFile> {
        let heap = match self.heap.take() {
            Some(heap) => heap,
            None => {
                let io = FileIo::create(&self.heap_path, self.config.io_buffer_size)?;
                self.layout_dirty = true;
                tracing::debug!(path = %self.heap_path.display(), "Created array heap");
                HeapFile::create(Box::new(io), self.endian)?
            },
        };
        Ok(self.heap.insert(heap))
    }

    fn unsupported(&self, cell: CellRef, operation: &'static str) -> Error {
        Error::UnsupportedOperation { column: self.desc(cell).name.clone(), operation }
    }

    fn array_cell(&self, column: &str, row: RowId) -> Result<CellRef> {
        let cell = self.locate(column, row)?;
        if self.desc(cell).is_array() { Ok(cell) } else { Err(self.unsupported(cell, "arrays")) }
    }

    /// Heap offset of a variable-shaped cell, detached from other rows.
    fn unshared_pointer(&mut self, cell: CellRef, row: RowId) -> Result<u64> {
        let ptr = self.read_pointer(cell)?;
        if ptr == 0 {
            return Err(Error::NoArray { column: self.desc(cell).name.clone(), row });
        }
        let heap = self.heap_mut()?;
        if heap.get_shape(ptr)?.refcount <= 1 {
            return Ok(ptr);
        }
        let copy = heap.copy_data(ptr)?;
        heap.decrement_ref(ptr)?;
        self.write_pointer(cell, copy)?;
        Ok(copy)
    }

    fn fixed_shape(&self, cell: CellRef) -> Option<Shape> {
        match &self.desc(cell).kind {
            ColumnKind::FixedArray(shape) => Some(shape.clone()),
            _ => None,
        }
    }

    /// Drops the heap references held by a column's cells.
    fn release_column_arrays(&mut self, column: &str) -> Result<()> {
        for row in 0..self.nrows {
            let cell = self.locate(column, row)?;
            let ptr = self.read_pointer(cell)?;
            if ptr != 0 {
                self.heap_mut()?.decrement_ref(ptr)?;
            }
        }
        Ok(())
    }

    /// Zeroes bytes `[offset, offset + width)` of every row of an index.
    fn zero_region(&mut self, index: usize, offset: usize, width: usize) -> Result<()> {
        let stride = self.indices[index].stride();
        let mut start = 0;
        let ranges = self.indices[index].ranges().to_vec();
        for range in ranges {
            let bucket = self.cache.get_bucket_mut(range.bucket)?;
            for slot in 0..(range.end - start) as usize {
                let at = slot * stride + offset;
                bucket[at..at + width].fill(0);
            }
            start = range.end;
        }
        Ok(())
    }

    /// Rebuilds index `i` with a row slot widened by `width` bytes, placing
    /// `column` in the new bytes. The new buckets are filled completely
    /// before the index is swapped in; on failure they are released and the
    /// old layout is kept.
    fn rearrange(&mut self, i: usize, column: &str, width: usize) -> Result<()> {
        let old = self.indices[i].clone();
        let mut widened = RowIndex::new(self.config.bucket_size, old.stride() + width);
        for slot in old.slots() {
            widened.place(slot.column.clone(), slot.offset, slot.width);
        }
        widened.place(column, old.stride(), width);

        let mut allocated = Vec::new();
        let result = self.fill_rearranged(&old, &mut widened, &mut allocated);
        if let Err(err) = result {
            for bucket in allocated {
                self.cache.remove_bucket(bucket);
            }
            return Err(err);
        }
        for bucket in old.buckets() {
            self.cache.remove_bucket(bucket);
        }
        tracing::debug!(
            path = %self.path.display(),
            column,
            old_stride = old.stride(),
            new_stride = widened.stride(),
            buckets = allocated.len(),
            "Rearranged row index"
        );
        self.indices[i] = widened;
        Ok(())
    }

    fn fill_rearranged(
        &mut self,
        old: &RowIndex,
        widened: &mut RowIndex,
        allocated: &mut Vec<BucketId>,
    ) -> Result<()> {
        let cache = &mut self.cache;
        widened.add_rows(self.nrows, || {
            let bucket = cache.add_bucket()?;
            allocated.push(bucket);
            Ok(bucket)
        })?;
        let stride = old.stride();
        let mut start = 0;
        for range in old.ranges() {
            let source = self.cache.get_bucket(range.bucket)?.clone();
            for row in start..range.end {
                let from = (row - start) as usize * stride;
                let target = widened.find(row).ok_or_else(|| Error::Corrupted {
                    name: self.path.display().to_string(),
                    reason: format!("row {row} lost while rearranging"),
                })?;
                let to = target.byte_offset(widened.stride());
                let bucket = self.cache.get_bucket_mut(target.bucket)?;
                bucket[to..to + stride].copy_from_slice(&source[from..from + stride]);
            }
            start = range.end;
        }
        Ok(())
    }

    fn layout(&self) -> Layout {
        Layout {
            columns: self.columns.clone(),
            indices: self.indices.clone(),
            free_buckets: self.cache.free_list().to_vec(),
            has_heap: self.heap.is_some(),
            change_count: self.change_count,
        }
    }

    /// Stores the layout record in the chain, growing the chain until the
    /// record (which includes the free list) fits.
    fn write_layout(&mut self) -> Result<u64> {
        let payload = self.config.bucket_size - CHAIN_LINK;
        loop {
            let blob = codec::encode(&self.layout())?;
            let needed = blob.len().div_ceil(payload).max(1);
            if needed > self.layout_chain.len() {
                let bucket = self.cache.add_bucket()?;
                self.layout_chain.push(bucket);
                continue;
            }
            let chain = self.layout_chain.clone();
            for (n, bucket) in chain.iter().enumerate() {
                let next = chain.get(n + 1).copied().unwrap_or(NO_BUCKET);
                let data = self.cache.get_bucket_mut(*bucket)?;
                data.fill(0);
                self.endian.write_u64(&mut data[0..CHAIN_LINK], next);
                let from = (n * payload).min(blob.len());
                let to = ((n + 1) * payload).min(blob.len());
                data[CHAIN_LINK..CHAIN_LINK + (to - from)].copy_from_slice(&blob[from..to]);
            }
            return Ok(blob.len() as u64);
        }
    }

    fn header(&self, layout_len: u64) -> Header {
        Header {
            endian: self.endian,
            bucket_size: self.config.bucket_size as u64,
            nr_buckets: self.cache.nr_buckets(),
            nrows: self.nrows,
            layout_len,
            layout_first: self.layout_chain.first().copied().unwrap_or(NO_BUCKET),
        }
    }

    fn open_io(&self, path: &Path) -> Result<Box<dyn ByteIo>> {
        Ok(Box::new(FileIo::open(path, self.writable, self.config.io_buffer_size)?))
    }

    fn touch_layout(&mut self) {
        self.change_count += 1;
        self.layout_dirty = true;
    }
}

/// Reads the layout record by following its bucket chain.
fn read_layout(file: &mut BucketFile, header: &Header) -> Result<(Layout, Vec<BucketId>)> {
    let name = file.name().to_string();
    let corrupted = |reason: String| Error::Corrupted { name: name.clone(), reason };
    let bucket_size = file.bucket_size();
    if bucket_size <= CHAIN_LINK {
        return Err(corrupted(format!("bucket size {bucket_size} too small")));
    }
    let payload = bucket_size - CHAIN_LINK;
    // The chain only runs through buckets present in the file.
    let stored = file.stored_buckets()?.min(header.nr_buckets);
    if header.layout_len > stored.saturating_mul(payload as u64) {
        return Err(corrupted(format!("layout of {} bytes exceeds {stored} stored buckets", header.layout_len)));
    }
    let mut blob = Vec::with_capacity(header.layout_len as usize);
    let mut chain = Vec::new();
    let mut buf = vec![0u8; bucket_size];
    let mut next = header.layout_first;
    while next != NO_BUCKET {
        if next >= header.nr_buckets || chain.len() as u64 >= header.nr_buckets {
            return Err(corrupted(format!("bad layout chain link {next}")));
        }
        file.read_bucket(next, &mut buf)?;
        chain.push(next);
        let take = payload.min(header.layout_len as usize - blob.len());
        blob.extend_from_slice(&buf[CHAIN_LINK..CHAIN_LINK + take]);
        next = header.endian.read_u64(&buf[0..CHAIN_LINK]);
    }
    if blob.len() as u64 != header.layout_len {
        return Err(Error::ShortRead { name, expected: header.layout_len as usize, actual: blob.len() });
    }
    Ok((codec::decode(&blob)?, chain))
}

impl StorageManager for StandardStMan {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn nrows(&self) -> u64 {
        self.nrows
    }

    fn add_rows(&mut self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.check_writable()?;
        let saved = self.indices.clone();
        let mut allocated = Vec::new();
        for i in 0..self.indices.len() {
            let cache = &mut self.cache;
            let added = self.indices[i].add_rows(count, || {
                let bucket = cache.add_bucket()?;
                allocated.push(bucket);
                Ok(bucket)
            });
            if let Err(err) = added {
                self.indices = saved;
                for bucket in allocated {
                    self.cache.remove_bucket(bucket);
                }
                return Err(err);
            }
        }
        self.nrows += count;
        self.touch_layout();
        tracing::trace!(path = %self.path.display(), count, nrows = self.nrows, "Added rows");
        Ok(())
    }

    fn remove_row(&mut self, row: RowId) -> Result<()> {
        check_row(row, self.nrows)?;
        self.check_writable()?;
        let variable: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.desc.can_change_shape())
            .map(|c| c.desc.name.clone())
            .collect();
        for column in &variable {
            let cell = self.locate(column, row)?;
            let ptr = self.read_pointer(cell)?;
            if ptr != 0 {
                self.heap_mut()?.decrement_ref(ptr)?;
            }
        }
        for i in 0..self.indices.len() {
            let stride = self.indices[i].stride();
            let Some(removed) = self.indices[i].remove_row(row) else { continue };
            if let Some(bucket) = removed.freed {
                self.cache.remove_bucket(bucket);
                continue;
            }
            let slot = removed.location.slot as usize;
            let used = removed.location.rows_in_bucket as usize;
            let bucket = self.cache.get_bucket_mut(removed.location.bucket)?;
            bucket.copy_within((slot + 1) * stride..used * stride, slot * stride);
            bucket[(used - 1) * stride..used * stride].fill(0);
        }
        self.nrows -= 1;
        self.touch_layout();
        Ok(())
    }

    fn add_column(&mut self, desc: &ColumnDesc) -> Result<()> {
        self.check_writable()?;
        let width = self.check_new_column(desc)?;

        // Spare bytes in an existing row slot.
        for i in 0..self.indices.len() {
            if let Some(offset) = self.indices[i].find_space(width) {
                self.zero_region(i, offset, width)?;
                self.indices[i].place(desc.name.clone(), offset, width);
                self.columns.push(ColumnEntry { desc: desc.clone(), index: i });
                self.touch_layout();
                return Ok(());
            }
        }

        // Widen the narrowest index that can take the column.
        let bucket_size = self.config.bucket_size;
        let candidate = (0..self.indices.len())
            .filter(|i| self.indices[*i].stride() + width <= bucket_size)
            .min_by_key(|i| self.indices[*i].stride());
        if let Some(i) = candidate {
            self.rearrange(i, &desc.name, width)?;
            self.columns.push(ColumnEntry { desc: desc.clone(), index: i });
            self.touch_layout();
            return Ok(());
        }

        let mut index = RowIndex::new(bucket_size, self.new_stride(width));
        index.place(desc.name.clone(), 0, width);
        let mut allocated = Vec::new();
        let cache = &mut self.cache;
        let added = index.add_rows(self.nrows, || {
            let bucket = cache.add_bucket()?;
            allocated.push(bucket);
            Ok(bucket)
        });
        if let Err(err) = added {
            for bucket in allocated {
                self.cache.remove_bucket(bucket);
            }
            return Err(err);
        }
        self.columns.push(ColumnEntry { desc: desc.clone(), index: self.indices.len() });
        self.indices.push(index);
        self.touch_layout();
        Ok(())
    }

    fn can_remove_column(&self, column: &str) -> Result<()> {
        self.entry_position(column)?;
        if !self.writable {
            return Err(Error::CannotRemoveColumn {
                name: column.to_string(),
                reason: format!("{} is not writable", self.path.display()),
            });
        }
        Ok(())
    }

    fn remove_column(&mut self, column: &str) -> Result<()> {
        self.can_remove_column(column)?;
        let position = self.entry_position(column)?;
        if self.columns[position].desc.can_change_shape() {
            self.release_column_arrays(column)?;
        }
        let entry = self.columns.remove(position);
        let i = entry.index;
        self.indices[i].remove_slot(column);
        if self.indices[i].has_no_columns() {
            let index = self.indices.remove(i);
            for bucket in index.buckets() {
                self.cache.remove_bucket(bucket);
            }
            for other in &mut self.columns {
                if other.index > i {
                    other.index -= 1;
                }
            }
        }
        self.touch_layout();
        Ok(())
    }

    fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        self.check_writable()?;
        if self.columns.iter().any(|c| c.desc.name == new) {
            return Err(Error::ColumnExists { name: new.to_string() });
        }
        let position = self.entry_position(old)?;
        let entry = &mut self.columns[position];
        entry.desc.name = new.to_string();
        self.indices[entry.index].rename_slot(old, new);
        self.touch_layout();
        Ok(())
    }

    fn get_scalar(&mut self, column: &str, row: RowId) -> Result<Value> {
        let cell = self.locate(column, row)?;
        let desc = self.desc(cell);
        if desc.is_array() {
            return Err(self.unsupported(cell, "scalars"));
        }
        let data_type = desc.data_type;
        let bytes = self.read_cell(cell)?;
        Ok(Value::decode(data_type, self.endian, &bytes)?)
    }

    fn put_scalar(&mut self, column: &str, row: RowId, value: &Value) -> Result<()> {
        let cell = self.locate(column, row)?;
        let desc = self.desc(cell);
        if desc.is_array() {
            return Err(self.unsupported(cell, "scalars"));
        }
        desc.check_type(value.data_type())?;
        self.check_writable()?;
        let mut bytes = vec![0u8; cell.width];
        value.encode(self.endian, &mut bytes);
        self.write_cell(cell, 0, &bytes)
    }

    fn shape(&mut self, column: &str, row: RowId) -> Result<Option<Shape>> {
        let cell = self.array_cell(column, row)?;
        if let Some(fixed) = self.fixed_shape(cell) {
            let defined = self.read_cell(cell)?[0] != 0;
            return Ok(defined.then_some(fixed));
        }
        let ptr = self.read_pointer(cell)?;
        if ptr == 0 {
            return Ok(None);
        }
        Ok(Some(self.heap_mut()?.get_shape(ptr)?.shape))
    }

    fn set_shape(&mut self, column: &str, row: RowId, shape: &Shape) -> Result<()> {
        let cell = self.array_cell(column, row)?;
        let desc = self.desc(cell);
        desc.check_put_shape(row, shape)?;
        let data_type = desc.data_type;
        self.check_writable()?;
        if self.fixed_shape(cell).is_some() {
            if self.read_cell(cell)?[0] == 0 {
                let mut bytes = vec![0u8; cell.width];
                bytes[0] = 1;
                self.write_cell(cell, 0, &bytes)?;
            }
            return Ok(());
        }
        let ptr = self.read_pointer(cell)?;
        let new = self.heap_mut()?.put_shape(ptr, data_type, shape)?;
        if new != ptr {
            self.write_pointer(cell, new)?;
        }
        Ok(())
    }

    fn get_array(&mut self, column: &str, row: RowId) -> Result<Option<ArrayValue>> {
        let cell = self.array_cell(column, row)?;
        let data_type = self.desc(cell).data_type;
        if let Some(fixed) = self.fixed_shape(cell) {
            let bytes = self.read_cell(cell)?;
            if bytes[0] == 0 {
                return Ok(None);
            }
            return Ok(Some(ArrayValue::from_bytes(data_type, fixed, self.endian, &bytes[1..])?));
        }
        let ptr = self.read_pointer(cell)?;
        if ptr == 0 {
            return Ok(None);
        }
        Ok(Some(self.heap_mut()?.get_data(ptr)?))
    }

    fn put_array(&mut self, column: &str, row: RowId, array: &ArrayValue) -> Result<()> {
        let cell = self.array_cell(column, row)?;
        self.desc(cell).check_type(array.data_type())?;
        self.set_shape(column, row, array.shape())?;
        if self.fixed_shape(cell).is_some() {
            return self.write_cell(cell, 1, &array.to_bytes(self.endian));
        }
        let ptr = self.unshared_pointer(cell, row)?;
        self.heap_mut()?.put_data(ptr, array)
    }

    fn get_slice(&mut self, column: &str, row: RowId, slicer: &Slicer) -> Result<ArrayValue> {
        let cell = self.array_cell(column, row)?;
        if self.fixed_shape(cell).is_some() {
            let array = self
                .get_array(column, row)?
                .ok_or_else(|| Error::NoArray { column: column.to_string(), row })?;
            return Ok(array.slice(slicer)?);
        }
        let ptr = self.read_pointer(cell)?;
        if ptr == 0 {
            return Err(Error::NoArray { column: column.to_string(), row });
        }
        self.heap_mut()?.get_slice(ptr, slicer)
    }

    fn put_slice(&mut self, column: &str, row: RowId, slicer: &Slicer, section: &ArrayValue) -> Result<()> {
        let cell = self.array_cell(column, row)?;
        self.desc(cell).check_type(section.data_type())?;
        self.check_writable()?;
        if self.fixed_shape(cell).is_some() {
            let mut array = self
                .get_array(column, row)?
                .ok_or_else(|| Error::NoArray { column: column.to_string(), row })?;
            array.put_slice(slicer, section)?;
            return self.write_cell(cell, 1, &array.to_bytes(self.endian));
        }
        let ptr = self.unshared_pointer(cell, row)?;
        self.heap_mut()?.put_slice(ptr, slicer, section)
    }

    fn get_scalar_column(&mut self, column: &str) -> Result<Vec<Value>> {
        let position = self.entry_position(column)?;
        let entry = &self.columns[position];
        if entry.desc.is_array() {
            return Err(Error::UnsupportedOperation { column: column.to_string(), operation: "scalars" });
        }
        let data_type = entry.desc.data_type;
        let index = &self.indices[entry.index];
        let stride = index.stride();
        let slot = index.slot(column).cloned().ok_or_else(|| Error::Corrupted {
            name: self.path.display().to_string(),
            reason: format!("column {column} has no slot"),
        })?;
        let ranges = index.ranges().to_vec();
        let mut values = Vec::with_capacity(self.nrows as usize);
        let mut start = 0;
        for range in ranges {
            let bucket = self.cache.get_bucket(range.bucket)?;
            for n in 0..(range.end - start) as usize {
                let at = n * stride + slot.offset;
                values.push(Value::decode(data_type, self.endian, &bucket[at..at + slot.width])?);
            }
            start = range.end;
        }
        Ok(values)
    }

    fn share_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        let source = self.array_cell(column, from)?;
        if self.fixed_shape(source).is_some() {
            return self.copy_cell(column, from, to);
        }
        let target = self.array_cell(column, to)?;
        self.check_writable()?;
        let ptr = self.read_pointer(source)?;
        if ptr == 0 {
            return Err(Error::NoArray { column: column.to_string(), row: from });
        }
        let old = self.read_pointer(target)?;
        if old == ptr {
            return Ok(());
        }
        let heap = self.heap_mut()?;
        heap.increment_ref(ptr)?;
        if old != 0 {
            heap.decrement_ref(old)?;
        }
        self.write_pointer(target, ptr)
    }

    fn copy_cell(&mut self, column: &str, from: RowId, to: RowId) -> Result<()> {
        let source = self.array_cell(column, from)?;
        let target = self.array_cell(column, to)?;
        self.check_writable()?;
        if self.fixed_shape(source).is_some() {
            let bytes = self.read_cell(source)?;
            if bytes[0] == 0 {
                return Err(Error::NoArray { column: column.to_string(), row: from });
            }
            return self.write_cell(target, 0, &bytes);
        }
        let ptr = self.read_pointer(source)?;
        if ptr == 0 {
            return Err(Error::NoArray { column: column.to_string(), row: from });
        }
        let old = self.read_pointer(target)?;
        let heap = self.heap_mut()?;
        let copy = heap.copy_data(ptr)?;
        if old != 0 {
            heap.decrement_ref(old)?;
        }
        self.write_pointer(target, copy)
    }

    fn flush(&mut self, sync: bool) -> Result<bool> {
        if !self.writable {
            return Ok(false);
        }
        let mut wrote = false;
        if let Some(heap) = &mut self.heap {
            wrote |= heap.flush(sync)?;
        }
        let layout_len = if self.layout_dirty { Some(self.write_layout()?) } else { None };
        wrote |= self.cache.flush(false)?;
        if let Some(len) = layout_len {
            let header = self.header(len).to_bytes();
            self.cache.file_mut().write_header(&header)?;
            self.layout_dirty = false;
            wrote = true;
        }
        self.cache.file_mut().flush(sync)?;
        if wrote {
            tracing::trace!(path = %self.path.display(), sync, "Flushed bucket file");
        }
        Ok(wrote)
    }

    fn resync(&mut self, nrows: u64) -> Result<()> {
        let io = self.open_io(&self.path)?;
        let mut file = BucketFile::new(io, SSM_HEADER_SIZE, self.config.bucket_size);
        let mut buf = vec![0u8; SSM_HEADER_SIZE as usize];
        file.read_header(&mut buf)?;
        let header = Header::from_bytes(file.name(), &buf)?;
        let (layout, chain) = read_layout(&mut file, &header)?;
        if header.nrows != nrows {
            tracing::warn!(path = %self.path.display(), file_rows = header.nrows, nrows, "Row count differs after resync");
        }
        let io = self.open_io(&self.path)?;
        self.cache.file_mut().replace_io(io);
        self.cache.resync(BucketAllocator::new(header.nr_buckets, layout.free_buckets.clone()));
        self.heap = if layout.has_heap {
            Some(HeapFile::open(self.open_io(&self.heap_path)?)?)
        } else {
            None
        };
        self.nrows = header.nrows;
        self.columns = layout.columns;
        self.indices = layout.indices;
        self.layout_chain = chain;
        self.change_count = layout.change_count;
        self.layout_dirty = false;
        tracing::debug!(path = %self.path.display(), nrows = self.nrows, "Resynced bucket file");
        Ok(())
    }

    fn reopen_rw(&mut self) -> Result<()> {
        if self.writable {
            return Ok(());
        }
        self.writable = true;
        let io = self.open_io(&self.path)?;
        self.cache.file_mut().replace_io(io);
        if self.heap.is_some() {
            let io = self.open_io(&self.heap_path)?;
            if let Some(heap) = &mut self.heap {
                heap.replace_io(io);
            }
        }
        Ok(())
    }

    fn change_count(&self) -> u64 {
        self.change_count
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(self.cache.stats())
    }
}

impl Drop for StandardStMan {
    fn drop(&mut self) {
        if let Err(error) = self.flush(false) {
            tracing::warn!(path = %self.path.display(), %error, "Failed to flush bucket file on close");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use coltable_types::{DataType, config::StorageConfig};
    use tempfile::TempDir;

    use super::*;
    use crate::io::{MemoryIo, SharedBuffer};

    fn ctx(dir: &TempDir, nrows: u64) -> StManContext {
        StManContext {
            dir: dir.path().to_path_buf(),
            name: "ssm".to_string(),
            seq: 0,
            storage: StorageConfig::builder().bucket_size(512).cache_size(4).reserved_row_bytes(4).build().unwrap(),
            writable: true,
            nrows,
        }
    }

    fn columns() -> Vec<ColumnDesc> {
        vec![
            ColumnDesc::scalar("id", DataType::Int32),
            ColumnDesc::fixed_array("pos", DataType::Float64, [3]),
            ColumnDesc::variable_array("data", DataType::Float32),
        ]
    }

    #[test]
    fn test_scalars_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut ssm = StandardStMan::create(&ctx(&dir, 0), &columns()).unwrap();
            ssm.add_rows(100).unwrap();
            for row in 0..100 {
                ssm.put_scalar("id", row, &Value::Int32(row as i32 * 3)).unwrap();
            }
        }
        let mut ssm = StandardStMan::open(&ctx(&dir, 100), &columns()).unwrap();
        assert_eq!(ssm.nrows(), 100);
        assert_eq!(ssm.get_scalar("id", 42).unwrap(), Value::Int32(126));
        let column = ssm.get_scalar_column("id").unwrap();
        assert_eq!(column.len(), 100);
        assert_eq!(column[99], Value::Int32(297));
    }

    #[test]
    fn test_fixed_array_cells() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 2), &columns()).unwrap();
        assert_eq!(ssm.shape("pos", 0).unwrap(), None);
        let pos = ArrayValue::from_vec(vec![1.0f64, 2.0, 3.0]);
        ssm.put_array("pos", 0, &pos).unwrap();
        assert_eq!(ssm.get_array("pos", 0).unwrap(), Some(pos.clone()));

        let err = ssm.put_array("pos", 1, &ArrayValue::from_vec(vec![1.0f64, 2.0])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { row: 1, .. }));
        // Nothing was written to the rejected row.
        assert_eq!(ssm.get_array("pos", 1).unwrap(), None);

        ssm.put_slice("pos", 0, &Slicer::new([2], [1]), &ArrayValue::from_vec(vec![9.0f64])).unwrap();
        assert_eq!(ssm.get_slice("pos", 0, &Slicer::new([1], [2])).unwrap(), ArrayValue::from_vec(vec![2.0f64, 9.0]));
    }

    #[test]
    fn test_variable_array_resize() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 1), &columns()).unwrap();
        let small = ArrayValue::from_vec(vec![1.0f32; 4]);
        let large = ArrayValue::new([10, 10], vec![2.0f32; 100]).unwrap();
        ssm.put_array("data", 0, &small).unwrap();
        ssm.put_array("data", 0, &large).unwrap();
        assert_eq!(ssm.get_array("data", 0).unwrap(), Some(large));
        ssm.put_array("data", 0, &small).unwrap();
        assert_eq!(ssm.shape("data", 0).unwrap(), Some(Shape::new([4])));
        assert_eq!(ssm.get_array("data", 0).unwrap(), Some(small));
    }

    #[test]
    fn test_share_and_copy_cells() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 3), &columns()).unwrap();
        let arr = ArrayValue::from_vec(vec![1.0f32, 2.0]);
        ssm.put_array("data", 0, &arr).unwrap();
        ssm.share_cell("data", 0, 1).unwrap();
        ssm.copy_cell("data", 0, 2).unwrap();
        assert_eq!(ssm.heap().unwrap().free_slots().len(), 0);

        // Writing the shared row detaches it.
        ssm.put_slice("data", 1, &Slicer::new([0], [1]), &ArrayValue::from_vec(vec![5.0f32])).unwrap();
        assert_eq!(ssm.get_array("data", 0).unwrap(), Some(arr.clone()));
        assert_eq!(ssm.get_array("data", 1).unwrap(), Some(ArrayValue::from_vec(vec![5.0f32, 2.0])));
        assert_eq!(ssm.get_array("data", 2).unwrap(), Some(arr));
    }

    #[test]
    fn test_remove_row_releases_array() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 3), &columns()).unwrap();
        for row in 0..3 {
            ssm.put_scalar("id", row, &Value::Int32(row as i32)).unwrap();
        }
        ssm.put_array("data", 1, &ArrayValue::from_vec(vec![7.0f32])).unwrap();
        ssm.remove_row(1).unwrap();
        assert_eq!(ssm.nrows(), 2);
        assert_eq!(ssm.get_scalar_column("id").unwrap(), vec![Value::Int32(0), Value::Int32(2)]);
        assert_eq!(ssm.heap().unwrap().free_slots().len(), 1);
        assert_eq!(ssm.shape("data", 1).unwrap(), None);

        // The vacated slot is reused zeroed.
        ssm.add_rows(1).unwrap();
        assert_eq!(ssm.get_scalar("id", 2).unwrap(), Value::Int32(0));
    }

    #[test]
    fn test_add_column_uses_spare_bytes() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 10), &[ColumnDesc::scalar("a", DataType::Int64)]).unwrap();
        let buckets = ssm.nr_buckets();
        ssm.add_column(&ColumnDesc::scalar("flag", DataType::Bool)).unwrap();
        assert_eq!(ssm.index_count(), 1);
        assert_eq!(ssm.nr_buckets(), buckets);
        assert_eq!(ssm.get_scalar("flag", 9).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_add_column_rearranges_rows() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 200), &[ColumnDesc::scalar("a", DataType::Int64)]).unwrap();
        for row in 0..200 {
            ssm.put_scalar("a", row, &Value::Int64(row as i64 - 50)).unwrap();
        }
        let stride = ssm.index_of("a").unwrap().stride();
        ssm.add_column(&ColumnDesc::scalar("b", DataType::Float64)).unwrap();
        let index = ssm.index_of("b").unwrap();
        assert_eq!(index.stride(), stride + 8);
        assert!(index.check_coverage(200));
        assert!(!ssm.free_buckets().is_empty());
        for row in [0, 63, 64, 199] {
            assert_eq!(ssm.get_scalar("a", row).unwrap(), Value::Int64(row as i64 - 50));
            assert_eq!(ssm.get_scalar("b", row).unwrap(), Value::Float64(0.0));
        }
    }

    #[test]
    fn test_failed_rearrange_keeps_old_layout() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 200), &[ColumnDesc::scalar("a", DataType::Int64)]).unwrap();
        for row in 0..200 {
            ssm.put_scalar("a", row, &Value::Int64(row as i64 * 7)).unwrap();
        }
        ssm.flush(false).unwrap();
        ssm.resize_cache(2).unwrap();

        // The file may not grow, so the first widened bucket to be written
        // back fails.
        let bytes = std::fs::read(ssm.path()).unwrap();
        let buffer = SharedBuffer::from_vec(bytes.clone());
        let capped = MemoryIo::with_buffer(buffer.share(), true).with_limit(bytes.len() as u64);
        ssm.cache.file_mut().replace_io(Box::new(capped));

        let stride = ssm.index_of("a").unwrap().stride();
        let in_use = ssm.nr_buckets() - ssm.free_buckets().len() as u64;
        let err = ssm.add_column(&ColumnDesc::scalar("b", DataType::Float64)).unwrap_err();
        assert!(matches!(err, Error::ShortWrite { .. }), "got {err}");

        assert!(ssm.index_of("b").is_none());
        let index = ssm.index_of("a").unwrap();
        assert_eq!(index.stride(), stride);
        assert!(index.check_coverage(200));
        assert!(!ssm.free_buckets().is_empty());
        assert_eq!(ssm.nr_buckets() - ssm.free_buckets().len() as u64, in_use, "every new bucket was freed");
        for row in 0..200 {
            assert_eq!(ssm.get_scalar("a", row).unwrap(), Value::Int64(row as i64 * 7));
        }
        assert_eq!(buffer.to_vec(), bytes);

        ssm.cache.file_mut().replace_io(Box::new(MemoryIo::with_buffer(buffer.share(), true)));
        ssm.add_column(&ColumnDesc::scalar("b", DataType::Float64)).unwrap();
        assert_eq!(ssm.index_of("b").unwrap().stride(), stride + 8);
        assert_eq!(ssm.get_scalar("a", 199).unwrap(), Value::Int64(199 * 7));
        assert_eq!(ssm.get_scalar("b", 199).unwrap(), Value::Float64(0.0));
    }

    #[test]
    fn test_oversized_column_rejected() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 1), &columns()).unwrap();
        let err = ssm.add_column(&ColumnDesc::fixed_array("big", DataType::Float64, [100])).unwrap_err();
        assert!(matches!(err, Error::InvalidColumn { .. }));
        assert!(ssm.index_of("big").is_none());
    }

    #[test]
    fn test_remove_and_rename_column() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 2), &columns()).unwrap();
        ssm.put_array("data", 0, &ArrayValue::from_vec(vec![1.0f32])).unwrap();
        ssm.remove_column("data").unwrap();
        assert_eq!(ssm.heap().unwrap().free_slots().len(), 1);
        ssm.rename_column("id", "key").unwrap();
        ssm.put_scalar("key", 1, &Value::Int32(4)).unwrap();
        ssm.flush(false).unwrap();
        drop(ssm);

        let cols = [ColumnDesc::scalar("key", DataType::Int32)];
        let mut ssm = StandardStMan::open(&ctx(&dir, 2), &cols).unwrap();
        assert_eq!(ssm.get_scalar("key", 1).unwrap(), Value::Int32(4));
        assert!(matches!(ssm.get_scalar("id", 1), Err(Error::NoSuchColumn { .. })));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut ssm = StandardStMan::create(&ctx(&dir, 5), &columns()).unwrap();
        assert!(!ssm.flush(false).unwrap());
        ssm.put_scalar("id", 3, &Value::Int32(1)).unwrap();
        assert!(ssm.flush(true).unwrap());
        let bytes = std::fs::read(ssm.path()).unwrap();
        assert!(!ssm.flush(true).unwrap());
        assert_eq!(std::fs::read(ssm.path()).unwrap(), bytes);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        drop(StandardStMan::create(&ctx(&dir, 1), &columns()).unwrap());
        let mut read_only = ctx(&dir, 1);
        read_only.writable = false;
        let mut ssm = StandardStMan::open(&read_only, &columns()).unwrap();
        assert!(matches!(ssm.put_scalar("id", 0, &Value::Int32(1)), Err(Error::NotWritable { .. })));
        assert!(matches!(ssm.can_remove_column("id"), Err(Error::CannotRemoveColumn { .. })));
        ssm.reopen_rw().unwrap();
        ssm.put_scalar("id", 0, &Value::Int32(1)).unwrap();
    }

    #[test]
    fn test_oversized_layout_length_rejected() {
        let dir = TempDir::new().unwrap();
        let path = {
            let ssm = StandardStMan::create(&ctx(&dir, 3), &columns()).unwrap();
            ssm.path().to_path_buf()
        };
        let mut bytes = std::fs::read(&path).unwrap();
        let header_len = SSM_HEADER_SIZE as usize;
        let mut header = Header::from_bytes("ssm", &bytes[..header_len]).unwrap();
        header.layout_len = u64::MAX / 2;
        bytes[..header_len].copy_from_slice(&header.to_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = StandardStMan::open(&ctx(&dir, 3), &columns()).unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }), "got {err}");
        assert!(err.to_string().contains("exceeds"), "{err}");
    }

    #[test]
    fn test_little_endian_file() {
        let dir = TempDir::new().unwrap();
        let mut context = ctx(&dir, 1);
        context.storage.byte_order = Endian::Little;
        {
            let mut ssm = StandardStMan::create(&context, &columns()).unwrap();
            ssm.put_scalar("id", 0, &Value::Int32(-7)).unwrap();
        }
        context.storage.byte_order = Endian::Big;
        let mut ssm = StandardStMan::open(&context, &columns()).unwrap();
        assert_eq!(ssm.endian(), Endian::Little);
        assert_eq!(ssm.get_scalar("id", 0).unwrap(), Value::Int32(-7));
    }
}
