//! Buffered file stream using position-based I/O (`pread`/`pwrite`).
//!
//! One block of the file is cached in user space. Reads and writes smaller
//! than a block go through it; moving to another block writes the current
//! one back if it is dirty. Transfers of at least a block bypass the buffer,
//! and a direct write that overlaps the cached block patches it so the two
//! never disagree.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    io::SeekFrom,
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use super::{ByteIo, resolve_seek};
use crate::error::{Error, Result, ShortWriteSnafu};

/// A file-backed [`ByteIo`] with a single buffered block.
#[derive(Debug)]
pub struct FileIo {
    file: File,
    path: PathBuf,
    name: String,
    writable: bool,
    position: u64,
    /// The cached block.
    block: Vec<u8>,
    /// File offset of the cached block, `None` if nothing is cached.
    block_offset: Option<u64>,
    /// Number of valid bytes in the cached block.
    block_len: usize,
    dirty: bool,
}

impl FileIo {
    /// Creates (or truncates) a file for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileIo`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| Error::FileIo { path: path.to_path_buf(), source })?;
        Ok(Self::from_file(file, path, true, block_size))
    }

    /// Opens an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileIo`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, writable: bool, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|source| Error::FileIo { path: path.to_path_buf(), source })?;
        Ok(Self::from_file(file, path, writable, block_size))
    }

    fn from_file(file: File, path: &Path, writable: bool, block_size: usize) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            name: path.display().to_string(),
            writable,
            position: 0,
            block: vec![0u8; block_size.max(1)],
            block_offset: None,
            block_len: 0,
            dirty: false,
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the buffered block.
    pub fn block_size(&self) -> usize {
        self.block.len()
    }

    fn block_start(&self, position: u64) -> u64 {
        let size = self.block.len() as u64;
        position / size * size
    }

    /// Writes the cached block back if it is dirty.
    fn write_block(&mut self) -> Result<()> {
        if let (true, Some(offset)) = (self.dirty, self.block_offset) {
            write_all_at_offset(&self.file, &self.block[..self.block_len], offset)
                .context(ShortWriteSnafu { name: self.name.as_str() })?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Makes the block containing `position` the cached one.
    fn load_block(&mut self, position: u64) -> Result<()> {
        let start = self.block_start(position);
        if self.block_offset == Some(start) {
            return Ok(());
        }
        self.write_block()?;
        self.block_len = read_at_offset(&self.file, &mut self.block, start)?;
        self.block_offset = Some(start);
        Ok(())
    }

    /// Copies the part of `data` written at `offset` that overlaps the
    /// cached block into it.
    fn patch_block(&mut self, offset: u64, data: &[u8]) {
        let Some(start) = self.block_offset else { return };
        let end = start + self.block.len() as u64;
        let data_end = offset + data.len() as u64;
        if data_end <= start || offset >= end {
            return;
        }
        let from = offset.max(start);
        let to = data_end.min(end);
        let dst = (from - start) as usize;
        let src = (from - offset) as usize;
        let n = (to - from) as usize;
        self.block[dst..dst + n].copy_from_slice(&data[src..src + n]);
        self.block_len = self.block_len.max(dst + n);
    }
}

impl ByteIo for FileIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() >= self.block.len() {
            self.write_block()?;
            let n = read_at_offset(&self.file, buf, self.position)?;
            self.position += n as u64;
            return Ok(n);
        }
        let mut done = 0;
        while done < buf.len() {
            self.load_block(self.position)?;
            let start = self.block_offset.unwrap_or_default();
            let in_block = (self.position - start) as usize;
            if in_block >= self.block_len {
                break;
            }
            let n = (self.block_len - in_block).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&self.block[in_block..in_block + n]);
            done += n;
            self.position += n as u64;
        }
        Ok(done)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::StreamCapability { name: self.name.clone(), operation: "writable" });
        }
        if buf.len() >= self.block.len() {
            write_all_at_offset(&self.file, buf, self.position)
                .context(ShortWriteSnafu { name: self.name.as_str() })?;
            self.patch_block(self.position, buf);
            self.position += buf.len() as u64;
            return Ok(());
        }
        let mut done = 0;
        while done < buf.len() {
            self.load_block(self.position)?;
            let start = self.block_offset.unwrap_or_default();
            let in_block = (self.position - start) as usize;
            let n = (self.block.len() - in_block).min(buf.len() - done);
            self.block[in_block..in_block + n].copy_from_slice(&buf[done..done + n]);
            // Bytes skipped over by a write beyond the valid end read as zero.
            if self.block_len < in_block {
                self.block[self.block_len..in_block].fill(0);
            }
            self.block_len = self.block_len.max(in_block + n);
            self.dirty = true;
            done += n;
            self.position += n as u64;
        }
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let length = match pos {
            SeekFrom::End(_) => self.length()?,
            _ => 0,
        };
        self.position = resolve_seek(&self.name, pos, self.position, length)?;
        Ok(self.position)
    }

    fn length(&mut self) -> Result<u64> {
        self.write_block()?;
        Ok(self.file.metadata()?.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.write_block()
    }

    fn sync(&mut self) -> Result<()> {
        self.write_block()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

impl Drop for FileIo {
    fn drop(&mut self) {
        if let Err(e) = self.write_block() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write buffered block on close");
        }
    }
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

/// Reads up to `buf.len()` bytes at `offset`, returning fewer only at EOF.
#[cfg(unix)]
fn read_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        match file.read_at(&mut buf[pos..], offset + pos as u64) {
            Ok(0) => break,
            Ok(n) => pos += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(pos)
}

/// Windows fallback: `seek_read` updates the file cursor, which this stream
/// never relies on.
#[cfg(windows)]
fn read_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        match file.seek_read(&mut buf[pos..], offset + pos as u64) {
            Ok(0) => break,
            Ok(n) => pos += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(pos)
}

/// Writes all of `data` to `file` at the given byte `offset`.
#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    file.write_all_at(data, offset)
}

/// Windows fallback for positional writes.
#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "seek_write wrote nothing"));
        }
        pos += n;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_small_writes_go_through_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        let mut io = FileIo::create(&path, 16).unwrap();

        io.write(b"abc").unwrap();
        io.write_at(20, b"xyz").unwrap();
        io.flush().unwrap();
        assert_eq!(io.length().unwrap(), 23);

        let mut buf = [0u8; 3];
        io.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        io.read_exact_at(20, &mut buf).unwrap();
        assert_eq!(&buf, b"xyz");

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[..3], b"abc");
        assert!(on_disk[3..20].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_large_write_patches_cached_block() {
        let dir = tempdir().unwrap();
        let mut io = FileIo::create(dir.path().join("data"), 8).unwrap();

        io.write_at(0, &[1u8; 4]).unwrap();
        // Direct write spanning the cached block.
        io.write_at(2, &[7u8; 10]).unwrap();

        let mut buf = [0u8; 12];
        io.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 1, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7]);

        io.flush().unwrap();
        let mut fresh = FileIo::open(io.path(), false, 8).unwrap();
        let mut buf = [0u8; 4];
        fresh.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 1, 7, 7]);
    }

    #[test]
    fn test_read_past_end_is_short() {
        let dir = tempdir().unwrap();
        let mut io = FileIo::create(dir.path().join("data"), 32).unwrap();
        io.write(&[5u8; 10]).unwrap();
        io.seek(SeekFrom::Start(6)).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(io.read(&mut buf).unwrap(), 4);

        io.seek(SeekFrom::Start(6)).unwrap();
        let err = io.read_exact(&mut buf).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 8, actual: 4, .. }));
    }

    #[test]
    fn test_read_only_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        FileIo::create(&path, 64).unwrap().write(b"x").unwrap();
        let mut io = FileIo::open(&path, false, 64).unwrap();
        assert!(!io.is_writable());
        assert!(io.write(b"y").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_reports_os_error() {
        let mut io = FileIo::open("/dev/full", true, 8).unwrap();
        let err = io.write(&[1u8; 16]).unwrap_err();
        assert!(matches!(err, Error::ShortWrite { .. }), "got {err}");
        assert!(err.to_string().starts_with("write error for file /dev/full: "), "{err}");

        // A dirty block fails the same way when it is written back.
        io.write_at(0, &[2u8; 4]).unwrap();
        let err = io.flush().unwrap_err();
        assert!(matches!(err, Error::ShortWrite { ref source, .. } if source.raw_os_error().is_some()), "got {err}");
    }

    #[test]
    fn test_open_missing_names_file() {
        let dir = tempdir().unwrap();
        let err = FileIo::open(dir.path().join("missing"), false, 64).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
