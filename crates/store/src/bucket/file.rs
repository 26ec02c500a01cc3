//! Fixed-size bucket region inside a byte stream.

use crate::{
    error::{BucketId, Result},
    io::ByteIo,
};

/// A stream organized as a header area followed by fixed-size buckets.
///
/// Bucket `n` starts at `header_size + n * bucket_size`.
#[derive(Debug)]
pub struct BucketFile {
    io: Box<dyn ByteIo>,
    header_size: u64,
    bucket_size: usize,
}

impl BucketFile {
    /// Wraps a stream.
    pub fn new(io: Box<dyn ByteIo>, header_size: u64, bucket_size: usize) -> Self {
        Self { io, header_size, bucket_size }
    }

    /// Size of one bucket in bytes.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Name of the underlying stream.
    pub fn name(&self) -> &str {
        self.io.name()
    }

    /// Returns `true` if the underlying stream accepts writes.
    pub fn is_writable(&self) -> bool {
        self.io.is_writable()
    }

    /// Number of whole buckets the stream currently holds.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the stream length cannot be determined.
    pub fn stored_buckets(&mut self) -> Result<u64> {
        let length = self.io.length()?;
        Ok(length.saturating_sub(self.header_size) / self.bucket_size.max(1) as u64)
    }

    fn offset(&self, bucket: BucketId) -> u64 {
        self.header_size + bucket * self.bucket_size as u64
    }

    /// Reads bucket `bucket` into `buf` (exactly one bucket long).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortRead`](crate::Error::ShortRead) if the bucket
    /// lies (partly) beyond the end of the file.
    pub fn read_bucket(&mut self, bucket: BucketId, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset(bucket);
        tracing::trace!(file = self.io.name(), bucket, "Reading bucket");
        self.io.read_exact_at(offset, buf)
    }

    /// Writes bucket `bucket` from `buf` (exactly one bucket long).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    pub fn write_bucket(&mut self, bucket: BucketId, buf: &[u8]) -> Result<()> {
        let offset = self.offset(bucket);
        tracing::trace!(file = self.io.name(), bucket, "Writing bucket");
        self.io.write_at(offset, buf)
    }

    /// Reads the header area.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortRead`](crate::Error::ShortRead) if the file is
    /// shorter than `buf`.
    pub fn read_header(&mut self, buf: &mut [u8]) -> Result<()> {
        self.io.read_exact_at(0, buf)
    }

    /// Writes the header area.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    pub fn write_header(&mut self, buf: &[u8]) -> Result<()> {
        self.io.write_at(0, buf)
    }

    /// Flushes buffered data, forcing it to disk if `sync` is set.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush fails.
    pub fn flush(&mut self, sync: bool) -> Result<()> {
        if sync { self.io.sync() } else { self.io.flush() }
    }

    /// Replaces the underlying stream (used when reopening for writing).
    pub fn replace_io(&mut self, io: Box<dyn ByteIo>) {
        self.io = io;
    }
}
