//! Indirect array heap.
//!
//! Variable-shaped array cells are stored out of line in a heap file; the
//! bucket holds only the record offset (0 means "no array"). Each record
//! describes itself and carries a persisted reference count so that rows
//! can share one array:
//!
//! ```text
//! Offset  Size     Field
//! ------  ----     -----
//! 0       4        Reference count (0 = free slot)
//! 4       1        Data type tag
//! 5       1        Number of axes (n)
//! 6       2        Reserved
//! 8       8        Slot length in bytes (whole record, 8-aligned)
//! 16      8 * n    Shape
//! 16+8n   ...      Elements, column-major
//! ```
//!
//! Slots whose count drops to zero go onto a free list (rebuilt on open by
//! walking the records) and are reused best-fit by later allocations.

use std::collections::HashMap;

use coltable_types::{ArrayValue, DataType, Endian, Shape, Slicer};

use crate::{
    error::{Error, Result},
    io::ByteIo,
};

/// Magic number of heap files.
pub const HEAP_MAGIC: &[u8; 8] = b"CTHEAP\0\0";

/// Current heap format version.
pub const HEAP_VERSION: u32 = 1;

/// Size of the heap file header; the first record starts here.
pub const HEAP_HEADER_SIZE: u64 = 64;

const RECORD_HEADER_SIZE: u64 = 16;
const HEADER_CHECKSUMMED: usize = 24;

/// Resolved description of a heap record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDescriptor {
    /// Record offset.
    pub offset: u64,
    /// Number of cells referencing the record.
    pub refcount: u32,
    /// Element type.
    pub data_type: DataType,
    /// Array shape.
    pub shape: Shape,
    /// Length of the slot in bytes.
    pub slot_len: u64,
}

impl HeapDescriptor {
    fn data_offset(&self) -> u64 {
        self.offset + RECORD_HEADER_SIZE + 8 * self.shape.ndim() as u64
    }

    fn data_len(&self) -> usize {
        self.shape.product() as usize * self.data_type.size()
    }
}

fn record_len(ndim: usize, data_len: usize) -> u64 {
    (RECORD_HEADER_SIZE + 8 * ndim as u64 + data_len as u64).next_multiple_of(8)
}

/// A heap of variable-shaped arrays in one stream.
#[derive(Debug)]
pub struct HeapFile {
    io: Box<dyn ByteIo>,
    endian: Endian,
    /// End of the last record.
    file_length: u64,
    /// Free slots as `(offset, slot_len)`.
    free: Vec<(u64, u64)>,
    descriptors: HashMap<u64, HeapDescriptor>,
    header_dirty: bool,
    /// Records written since the last flush.
    dirty: bool,
}

impl HeapFile {
    /// Initializes an empty heap in `io`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the header cannot be written.
    pub fn create(io: Box<dyn ByteIo>, endian: Endian) -> Result<Self> {
        let mut heap = Self {
            io,
            endian,
            file_length: HEAP_HEADER_SIZE,
            free: Vec::new(),
            descriptors: HashMap::new(),
            header_dirty: true,
            dirty: false,
        };
        heap.write_header()?;
        Ok(heap)
    }

    /// Opens an existing heap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`], [`Error::HeaderChecksumMismatch`] or
    /// [`Error::UnsupportedVersion`] for a malformed file.
    pub fn open(io: Box<dyn ByteIo>) -> Result<Self> {
        let mut heap = Self {
            io,
            endian: Endian::Big,
            file_length: HEAP_HEADER_SIZE,
            free: Vec::new(),
            descriptors: HashMap::new(),
            header_dirty: false,
            dirty: false,
        };
        heap.resync()?;
        Ok(heap)
    }

    /// Byte order of the stored values.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// End offset of the last record.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Free slots as `(offset, slot_len)`.
    pub fn free_slots(&self) -> &[(u64, u64)] {
        &self.free
    }

    fn corrupted(&self, reason: impl Into<String>) -> Error {
        Error::Corrupted { name: self.io.name().to_string(), reason: reason.into() }
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEAP_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(HEAP_MAGIC);
        self.endian.write_u32(&mut buf[8..12], HEAP_VERSION);
        buf[12] = self.endian.to_tag();
        self.endian.write_u64(&mut buf[16..24], self.file_length);
        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[0..HEADER_CHECKSUMMED]);
        self.endian.write_u64(&mut buf[24..32], checksum);
        self.io.write_at(0, &buf)?;
        self.header_dirty = false;
        Ok(())
    }

    /// Discards cached descriptors and rereads the header and free list.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or cannot be read.
    pub fn resync(&mut self) -> Result<()> {
        let mut buf = [0u8; HEAP_HEADER_SIZE as usize];
        self.io.read_exact_at(0, &mut buf)?;
        if &buf[0..8] != HEAP_MAGIC {
            return Err(self.corrupted("invalid heap magic"));
        }
        let endian =
            Endian::from_tag(buf[12]).ok_or_else(|| self.corrupted("invalid byte order tag"))?;
        let checksum = endian.read_u64(&buf[24..32]);
        if checksum != xxhash_rust::xxh3::xxh3_64(&buf[0..HEADER_CHECKSUMMED]) {
            return Err(Error::HeaderChecksumMismatch { name: self.io.name().to_string() });
        }
        let version = endian.read_u32(&buf[8..12]);
        if version != HEAP_VERSION {
            return Err(Error::UnsupportedVersion { name: self.io.name().to_string(), version });
        }
        self.endian = endian;
        self.file_length = endian.read_u64(&buf[16..24]);
        self.descriptors.clear();
        self.header_dirty = false;
        self.dirty = false;
        self.rebuild_free_list()
    }

    fn rebuild_free_list(&mut self) -> Result<()> {
        self.free.clear();
        let mut offset = HEAP_HEADER_SIZE;
        let mut head = [0u8; RECORD_HEADER_SIZE as usize];
        while offset < self.file_length {
            self.io.read_exact_at(offset, &mut head)?;
            let refcount = self.endian.read_u32(&head[0..4]);
            let slot_len = self.endian.read_u64(&head[8..16]);
            if slot_len < RECORD_HEADER_SIZE || offset + slot_len > self.file_length {
                return Err(self.corrupted(format!("bad slot length {slot_len} at offset {offset}")));
            }
            if refcount == 0 {
                self.free.push((offset, slot_len));
            }
            offset += slot_len;
        }
        Ok(())
    }

    /// Resolves the record at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHeapArray`] if `offset` is 0 or refers to a free
    /// slot.
    pub fn get_shape(&mut self, offset: u64) -> Result<HeapDescriptor> {
        if let Some(desc) = self.descriptors.get(&offset) {
            return Ok(desc.clone());
        }
        if offset < HEAP_HEADER_SIZE || offset >= self.file_length {
            return Err(Error::NoHeapArray { offset });
        }
        let mut head = [0u8; RECORD_HEADER_SIZE as usize];
        self.io.read_exact_at(offset, &mut head)?;
        let refcount = self.endian.read_u32(&head[0..4]);
        if refcount == 0 {
            return Err(Error::NoHeapArray { offset });
        }
        let data_type = DataType::try_from(head[4])?;
        let ndim = head[5] as usize;
        let slot_len = self.endian.read_u64(&head[8..16]);
        let mut dims = vec![0u8; 8 * ndim];
        self.io.read_exact(&mut dims)?;
        let shape = Shape::new(dims.chunks_exact(8).map(|c| self.endian.read_u64(c)).collect::<Vec<_>>());
        let desc = HeapDescriptor { offset, refcount, data_type, shape, slot_len };
        self.descriptors.insert(offset, desc.clone());
        Ok(desc)
    }

    /// Gives the cell currently referencing `current` (0 for none) an array
    /// of `shape`, returning the offset of the record to use.
    ///
    /// A record that already has the shape is kept with its data, shared or
    /// not; a shared one is only detached when written. An unshared record
    /// large enough for the new shape is rewritten in place. Otherwise the
    /// old record loses a reference and a slot is allocated, reusing a free
    /// one when possible. Reshaped and new arrays are zero-filled.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the heap cannot be read or written.
    pub fn put_shape(&mut self, current: u64, data_type: DataType, shape: &Shape) -> Result<u64> {
        let data_len = shape.product() as usize * data_type.size();
        if current != 0 {
            let desc = self.get_shape(current)?;
            if desc.shape == *shape && desc.data_type == data_type {
                return Ok(current);
            }
            if desc.refcount <= 1 && record_len(shape.ndim(), data_len) <= desc.slot_len {
                self.write_record(current, 1, data_type, shape, desc.slot_len)?;
                return Ok(current);
            }
            self.decrement_ref(current)?;
        }
        self.allocate(data_type, shape)
    }

    fn allocate(&mut self, data_type: DataType, shape: &Shape) -> Result<u64> {
        let data_len = shape.product() as usize * data_type.size();
        let needed = record_len(shape.ndim(), data_len);
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, (_, len))| *len >= needed)
            .min_by_key(|(_, (_, len))| *len)
            .map(|(i, _)| i);
        let (offset, slot_len) = match best {
            Some(i) => self.free.swap_remove(i),
            None => {
                let offset = self.file_length;
                self.file_length += needed;
                self.header_dirty = true;
                (offset, needed)
            },
        };
        self.write_record(offset, 1, data_type, shape, slot_len)?;
        tracing::trace!(file = self.io.name(), offset, slot_len, "Allocated heap record");
        Ok(offset)
    }

    /// Writes a record header plus zeroed data.
    fn write_record(
        &mut self,
        offset: u64,
        refcount: u32,
        data_type: DataType,
        shape: &Shape,
        slot_len: u64,
    ) -> Result<()> {
        let ndim = shape.ndim();
        let data_len = shape.product() as usize * data_type.size();
        let mut buf = vec![0u8; RECORD_HEADER_SIZE as usize + 8 * ndim + data_len];
        self.endian.write_u32(&mut buf[0..4], refcount);
        buf[4] = data_type as u8;
        buf[5] = u8::try_from(ndim).map_err(|_| self.corrupted(format!("{ndim} axes do not fit a record")))?;
        self.endian.write_u64(&mut buf[8..16], slot_len);
        for (i, d) in shape.dims().iter().enumerate() {
            let at = RECORD_HEADER_SIZE as usize + 8 * i;
            self.endian.write_u64(&mut buf[at..at + 8], *d);
        }
        self.io.write_at(offset, &buf)?;
        self.dirty = true;
        self.descriptors.insert(
            offset,
            HeapDescriptor { offset, refcount, data_type, shape: shape.clone(), slot_len },
        );
        Ok(())
    }

    /// Reads the array at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHeapArray`] for an undefined offset.
    pub fn get_data(&mut self, offset: u64) -> Result<ArrayValue> {
        let desc = self.get_shape(offset)?;
        let mut bytes = vec![0u8; desc.data_len()];
        self.io.read_exact_at(desc.data_offset(), &mut bytes)?;
        Ok(ArrayValue::from_bytes(desc.data_type, desc.shape, self.endian, &bytes)?)
    }

    /// Writes `array` into the record at `offset`, whose shape must match.
    ///
    /// # Errors
    ///
    /// Returns an array error if the type or shape differs from the record.
    pub fn put_data(&mut self, offset: u64, array: &ArrayValue) -> Result<()> {
        let desc = self.get_shape(offset)?;
        check_fits(&desc, array.data_type(), array.shape())?;
        self.dirty = true;
        self.io.write_at(desc.data_offset(), &array.to_bytes(self.endian))
    }

    /// Reads a section of the array at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an array error if the section lies outside the array.
    pub fn get_slice(&mut self, offset: u64, slicer: &Slicer) -> Result<ArrayValue> {
        let desc = self.get_shape(offset)?;
        slicer.check(&desc.shape)?;
        let size = desc.data_type.size();
        let mut bytes = Vec::with_capacity(slicer.shape().product() as usize * size);
        for (start, count) in slicer.runs(&desc.shape) {
            let from = bytes.len();
            bytes.resize(from + count as usize * size, 0);
            self.io.read_exact_at(desc.data_offset() + start * size as u64, &mut bytes[from..])?;
        }
        Ok(ArrayValue::from_bytes(desc.data_type, slicer.shape().clone(), self.endian, &bytes)?)
    }

    /// Writes a section of the array at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an array error if the section lies outside the array or
    /// `section` has the wrong type or shape.
    pub fn put_slice(&mut self, offset: u64, slicer: &Slicer, section: &ArrayValue) -> Result<()> {
        let desc = self.get_shape(offset)?;
        slicer.check(&desc.shape)?;
        let target = HeapDescriptor { shape: slicer.shape().clone(), ..desc.clone() };
        check_fits(&target, section.data_type(), section.shape())?;
        let size = desc.data_type.size();
        let bytes = section.to_bytes(self.endian);
        self.dirty = true;
        let mut pos = 0;
        for (start, count) in slicer.runs(&desc.shape) {
            let len = count as usize * size;
            self.io.write_at(desc.data_offset() + start * size as u64, &bytes[pos..pos + len])?;
            pos += len;
        }
        Ok(())
    }

    /// Adds a reference to the record at `offset`, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHeapArray`] for an undefined offset, or
    /// [`Error::Corrupted`] if the count would overflow.
    pub fn increment_ref(&mut self, offset: u64) -> Result<u32> {
        let desc = self.get_shape(offset)?;
        self.set_refcount(desc, |n| n.checked_add(1))
    }

    /// Drops a reference to the record at `offset`, returning the new count.
    /// At zero the slot becomes free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHeapArray`] for an undefined offset.
    pub fn decrement_ref(&mut self, offset: u64) -> Result<u32> {
        let desc = self.get_shape(offset)?;
        let slot_len = desc.slot_len;
        let count = self.set_refcount(desc, |n| n.checked_sub(1))?;
        if count == 0 {
            self.descriptors.remove(&offset);
            self.free.push((offset, slot_len));
        }
        Ok(count)
    }

    fn set_refcount(&mut self, mut desc: HeapDescriptor, update: impl Fn(u32) -> Option<u32>) -> Result<u32> {
        let Some(count) = update(desc.refcount) else {
            let reason = format!("reference count {} of record at {} out of range", desc.refcount, desc.offset);
            return Err(self.corrupted(reason));
        };
        desc.refcount = count;
        let mut buf = [0u8; 4];
        self.endian.write_u32(&mut buf, desc.refcount);
        self.io.write_at(desc.offset, &buf)?;
        self.dirty = true;
        let count = desc.refcount;
        self.descriptors.insert(desc.offset, desc);
        Ok(count)
    }

    /// Copies the record at `offset` into a new, unshared record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHeapArray`] for an undefined offset.
    pub fn copy_data(&mut self, offset: u64) -> Result<u64> {
        let array = self.get_data(offset)?;
        let copy = self.allocate(array.data_type(), array.shape())?;
        self.put_data(copy, &array)?;
        Ok(copy)
    }

    /// Writes the header if needed and flushes the stream.
    ///
    /// Returns `true` if anything was written since the last flush.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a write fails.
    pub fn flush(&mut self, sync: bool) -> Result<bool> {
        let wrote = self.header_dirty || self.dirty;
        if self.header_dirty {
            self.write_header()?;
        }
        self.dirty = false;
        if sync {
            self.io.sync()?;
        } else {
            self.io.flush()?;
        }
        Ok(wrote)
    }

    /// Replaces the underlying stream (used when reopening for writing).
    pub fn replace_io(&mut self, io: Box<dyn ByteIo>) {
        self.io = io;
    }
}

fn check_fits(desc: &HeapDescriptor, data_type: DataType, shape: &Shape) -> Result<()> {
    if desc.data_type != data_type {
        return Err(coltable_types::ArrayError::TypeMismatch { expected: desc.data_type, found: data_type }.into());
    }
    if desc.shape != *shape {
        return Err(coltable_types::ArrayError::ShapeMismatch {
            expected: desc.shape.clone(),
            found: shape.clone(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::io::{MemoryIo, SharedBuffer};

    fn heap() -> (HeapFile, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let io = MemoryIo::with_buffer(buffer.share(), true);
        (HeapFile::create(Box::new(io), Endian::Little).unwrap(), buffer)
    }

    fn doubles(n: usize) -> ArrayValue {
        ArrayValue::from_vec((0..n).map(|i| i as f64 * 0.5).collect::<Vec<_>>())
    }

    #[test]
    fn test_put_and_get() {
        let (mut heap, _) = heap();
        let arr = doubles(10);
        let offset = heap.put_shape(0, DataType::Float64, arr.shape()).unwrap();
        assert_eq!(offset, HEAP_HEADER_SIZE);
        // Newly shaped arrays read as zeros.
        assert_eq!(heap.get_data(offset).unwrap(), ArrayValue::zeros(DataType::Float64, Shape::new([10])));
        heap.put_data(offset, &arr).unwrap();
        assert_eq!(heap.get_data(offset).unwrap(), arr);
        assert_eq!(heap.get_shape(offset).unwrap().refcount, 1);
    }

    #[test]
    fn test_undefined_offset_is_no_array() {
        let (mut heap, _) = heap();
        assert!(matches!(heap.get_shape(0), Err(Error::NoHeapArray { offset: 0 })));
        assert!(heap.get_data(4096).is_err());
    }

    #[test]
    fn test_same_shape_keeps_record_and_data() {
        let (mut heap, _) = heap();
        let arr = doubles(4);
        let offset = heap.put_shape(0, DataType::Float64, arr.shape()).unwrap();
        heap.put_data(offset, &arr).unwrap();
        assert_eq!(heap.put_shape(offset, DataType::Float64, arr.shape()).unwrap(), offset);
        assert_eq!(heap.get_data(offset).unwrap(), arr);
    }

    #[test]
    fn test_shrink_reuses_slot_in_place() {
        let (mut heap, _) = heap();
        let offset = heap.put_shape(0, DataType::Float64, &Shape::new([10])).unwrap();
        let length = heap.file_length();
        let smaller = heap.put_shape(offset, DataType::Float64, &Shape::new([2])).unwrap();
        assert_eq!(smaller, offset);
        assert_eq!(heap.file_length(), length);
        heap.put_data(smaller, &doubles(2)).unwrap();
        assert_eq!(heap.get_data(smaller).unwrap(), doubles(2));
    }

    #[test]
    fn test_grow_relocates_and_frees_old_slot() {
        let (mut heap, _) = heap();
        let offset = heap.put_shape(0, DataType::Int32, &Shape::new([2])).unwrap();
        let bigger = heap.put_shape(offset, DataType::Int32, &Shape::new([100])).unwrap();
        assert_ne!(bigger, offset);
        assert_eq!(heap.free_slots(), &[(offset, 32)]);

        // A later small allocation takes the freed slot.
        let reused = heap.put_shape(0, DataType::Int32, &Shape::new([1])).unwrap();
        assert_eq!(reused, offset);
        assert!(heap.free_slots().is_empty());
    }

    #[test]
    fn test_refcount_sharing() {
        let (mut heap, _) = heap();
        let arr = doubles(3);
        let offset = heap.put_shape(0, DataType::Float64, arr.shape()).unwrap();
        heap.put_data(offset, &arr).unwrap();

        assert_eq!(heap.increment_ref(offset).unwrap(), 2);
        // The same shape keeps the shared record and its data.
        assert_eq!(heap.put_shape(offset, DataType::Float64, arr.shape()).unwrap(), offset);
        assert_eq!(heap.get_shape(offset).unwrap().refcount, 2);
        assert_eq!(heap.get_data(offset).unwrap(), arr);

        // A shared record is never reshaped in place.
        let detached = heap.put_shape(offset, DataType::Float64, &Shape::new([1])).unwrap();
        assert_ne!(detached, offset);
        assert_eq!(heap.get_shape(offset).unwrap().refcount, 1);
        assert_eq!(heap.get_data(offset).unwrap(), arr);

        assert_eq!(heap.decrement_ref(offset).unwrap(), 0);
        assert!(heap.get_shape(offset).is_err());
        assert_eq!(heap.free_slots().len(), 1);
    }

    #[test]
    fn test_refcount_overflow_is_corruption() {
        let (mut heap, buffer) = heap();
        let offset = heap.put_shape(0, DataType::Int16, &Shape::new([2])).unwrap();
        heap.flush(false).unwrap();
        let mut bytes = buffer.to_vec();
        let at = offset as usize;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        let mut heap = HeapFile::open(Box::new(MemoryIo::from_vec(bytes))).unwrap();
        assert_eq!(heap.get_shape(offset).unwrap().refcount, u32::MAX);
        let err = heap.increment_ref(offset).unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }), "got {err}");
        assert_eq!(heap.get_shape(offset).unwrap().refcount, u32::MAX);
    }

    #[test]
    fn test_slices() {
        let (mut heap, _) = heap();
        let arr = ArrayValue::new([3, 3], (0..9).collect::<Vec<i32>>()).unwrap();
        let offset = heap.put_shape(0, DataType::Int32, arr.shape()).unwrap();
        heap.put_data(offset, &arr).unwrap();

        let slicer = Slicer::new([1, 0], [2, 2]);
        assert_eq!(heap.get_slice(offset, &slicer).unwrap(), arr.slice(&slicer).unwrap());

        let section = ArrayValue::new([2, 2], vec![-1i32, -2, -3, -4]).unwrap();
        heap.put_slice(offset, &slicer, &section).unwrap();
        let mut expected = arr.clone();
        expected.put_slice(&slicer, &section).unwrap();
        assert_eq!(heap.get_data(offset).unwrap(), expected);

        let wrong = ArrayValue::new([1, 2], vec![0i32, 0]).unwrap();
        assert!(heap.put_slice(offset, &slicer, &wrong).unwrap_err().is_checked());
    }

    #[test]
    fn test_copy_data_is_independent() {
        let (mut heap, _) = heap();
        let arr = doubles(5);
        let offset = heap.put_shape(0, DataType::Float64, arr.shape()).unwrap();
        heap.put_data(offset, &arr).unwrap();
        let copy = heap.copy_data(offset).unwrap();
        heap.put_slice(offset, &Slicer::new([0], [1]), &ArrayValue::from_vec(vec![9.0f64])).unwrap();
        assert_eq!(heap.get_data(copy).unwrap(), arr);
        assert_eq!(heap.get_shape(copy).unwrap().refcount, 1);
    }

    #[test]
    fn test_reopen_rebuilds_free_list() {
        let (mut heap, buffer) = heap();
        let a = heap.put_shape(0, DataType::UInt8, &Shape::new([8])).unwrap();
        let b = heap.put_shape(0, DataType::UInt8, &Shape::new([8])).unwrap();
        heap.put_data(b, &ArrayValue::from_vec(vec![7u8; 8])).unwrap();
        heap.decrement_ref(a).unwrap();
        heap.flush(false).unwrap();
        drop(heap);

        let mut reopened = HeapFile::open(Box::new(MemoryIo::with_buffer(buffer, true))).unwrap();
        assert_eq!(reopened.endian(), Endian::Little);
        assert_eq!(reopened.free_slots(), &[(a, 32)]);
        assert_eq!(reopened.get_data(b).unwrap(), ArrayValue::from_vec(vec![7u8; 8]));
    }

    #[test]
    fn test_flush_reports_writes_once() {
        let (mut heap, _) = heap();
        // The header is written by create itself.
        assert!(!heap.flush(false).unwrap());
        let offset = heap.put_shape(0, DataType::Int16, &Shape::new([2])).unwrap();
        assert!(heap.flush(false).unwrap());
        heap.increment_ref(offset).unwrap();
        assert!(heap.flush(true).unwrap());
        assert!(!heap.flush(true).unwrap());
    }

    #[test]
    fn test_corrupt_header_detected() {
        let (mut heap, buffer) = heap();
        heap.flush(false).unwrap();
        let mut bytes = buffer.to_vec();
        bytes[17] ^= 0xFF;
        let err = HeapFile::open(Box::new(MemoryIo::from_vec(bytes))).unwrap_err();
        assert!(matches!(err, Error::HeaderChecksumMismatch { .. }));
    }
}
