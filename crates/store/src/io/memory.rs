//! In-memory byte stream.

use std::{
    io::{self, SeekFrom},
    sync::Arc,
};

use parking_lot::RwLock;

use super::{ByteIo, resolve_seek};
use crate::error::{Error, Result};

/// A growable byte buffer with explicit sharing.
///
/// `SharedBuffer` is deliberately not `Clone`: [`share`](Self::share) hands
/// out another handle to the same bytes, while [`deep_copy`](Self::deep_copy)
/// duplicates them.
#[derive(Debug, Default)]
pub struct SharedBuffer {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing bytes.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes: Arc::new(RwLock::new(bytes)) }
    }

    /// Returns another handle to the same underlying bytes.
    pub fn share(&self) -> Self {
        Self { bytes: Arc::clone(&self.bytes) }
    }

    /// Returns an independent copy of the bytes.
    pub fn deep_copy(&self) -> Self {
        Self::from_vec(self.bytes.read().clone())
    }

    /// Returns `true` if both handles refer to the same bytes.
    pub fn is_same(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.read().is_empty()
    }

    /// Copies the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Replaces the contents.
    pub fn replace(&self, bytes: Vec<u8>) {
        *self.bytes.write() = bytes;
    }
}

/// An in-memory [`ByteIo`] over a [`SharedBuffer`].
#[derive(Debug)]
pub struct MemoryIo {
    buffer: SharedBuffer,
    position: u64,
    writable: bool,
    name: String,
    limit: Option<u64>,
}

impl MemoryIo {
    /// Creates an empty, writable stream.
    pub fn new() -> Self {
        Self::with_buffer(SharedBuffer::new(), true)
    }

    /// Creates a writable stream holding `bytes`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::with_buffer(SharedBuffer::from_vec(bytes), true)
    }

    /// Creates a read-only stream holding `bytes`.
    pub fn read_only(bytes: Vec<u8>) -> Self {
        Self::with_buffer(SharedBuffer::from_vec(bytes), false)
    }

    /// Creates a stream over an existing buffer.
    pub fn with_buffer(buffer: SharedBuffer, writable: bool) -> Self {
        Self { buffer, position: 0, writable, name: "<memory>".to_string(), limit: None }
    }

    /// Sets the name used in error messages.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Caps the stream at `limit` bytes. A write reaching past it fails the
    /// way a full disk does and leaves the bytes untouched.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Copies the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Empties the stream and rewinds it.
    pub fn clear(&mut self) {
        self.buffer.replace(Vec::new());
        self.position = 0;
    }
}

impl Default for MemoryIo {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteIo for MemoryIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.buffer.bytes.read();
        let start = (self.position as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::StreamCapability { name: self.name.clone(), operation: "writable" });
        }
        let start = self.position as usize;
        let end = start + buf.len();
        if let Some(limit) = self.limit
            && end as u64 > limit
        {
            return Err(Error::ShortWrite { name: self.name.clone(), source: io::ErrorKind::StorageFull.into() });
        }
        let mut bytes = self.buffer.bytes.write();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let length = self.buffer.len() as u64;
        self.position = resolve_seek(&self.name, pos, self.position, length)?;
        Ok(self.position)
    }

    fn length(&mut self) -> Result<u64> {
        Ok(self.buffer.len() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
