//! Byte stream backends.
//!
//! All storage files are accessed through the [`ByteIo`] trait:
//! - [`MemoryIo`]: an in-memory growable buffer, optionally shared
//! - [`FileIo`]: a file with one user-level buffered block and 64-bit offsets
//!
//! A `read` may return fewer bytes than requested only at end of stream.
//! Callers that require the full amount use [`ByteIo::read_exact`], which
//! turns a short read into [`Error::ShortRead`]; callers that tolerate a
//! short read (buckets past the written end of a file) use
//! [`ByteIo::read_zero_filled`].

mod file;
mod memory;

use std::io::SeekFrom;

pub use file::FileIo;
pub use memory::{MemoryIo, SharedBuffer};

use crate::error::{Error, Result};

/// A seekable byte stream.
pub trait ByteIo: Send + std::fmt::Debug {
    /// Name of the stream, used in error messages.
    fn name(&self) -> &str;

    /// Reads up to `buf.len()` bytes at the current position.
    ///
    /// Returns the number of bytes read; it is smaller than requested only
    /// at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the stream is not readable or the read fails.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `buf` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortWrite`] or an I/O error if not everything could
    /// be written.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Moves the current position, returning the new absolute position.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting position would be negative.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current length of the stream in bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the length cannot be determined.
    fn length(&mut self) -> Result<u64>;

    /// Writes buffered data to the underlying storage.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    fn flush(&mut self) -> Result<()>;

    /// Flushes and forces the data to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails.
    fn sync(&mut self) -> Result<()> {
        self.flush()
    }

    /// Whether the stream can be read.
    fn is_readable(&self) -> bool;

    /// Whether the stream can be written.
    fn is_writable(&self) -> bool;

    /// Whether the stream supports seeking.
    fn is_seekable(&self) -> bool {
        true
    }

    /// Reads exactly `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortRead`] naming the stream and the byte counts if
    /// the end of the stream is reached first.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let actual = self.read(buf)?;
        if actual != buf.len() {
            return Err(Error::ShortRead {
                name: self.name().to_string(),
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes, zero-filling what lies past the end.
    ///
    /// Returns the number of bytes actually present in the stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the read fails.
    fn read_zero_filled(&mut self, buf: &mut [u8]) -> Result<usize> {
        let actual = self.read(buf)?;
        buf[actual..].fill(0);
        Ok(actual)
    }

    /// Seeks to `offset` and reads exactly `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// See [`read_exact`](Self::read_exact).
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    /// Seeks to `offset` and writes all of `buf`.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write(buf)
    }
}

impl ByteIo for Box<dyn ByteIo> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn length(&mut self) -> Result<u64> {
        (**self).length()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn is_readable(&self) -> bool {
        (**self).is_readable()
    }

    fn is_writable(&self) -> bool {
        (**self).is_writable()
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
}

/// Resolves a [`SeekFrom`] against the current position and length.
pub(crate) fn resolve_seek(name: &str, pos: SeekFrom, current: u64, length: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::End(delta) => length.checked_add_signed(delta),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
    };
    target.ok_or_else(|| Error::Corrupted {
        name: name.to_string(),
        reason: format!("seek to {pos:?} outside the stream"),
    })
}
