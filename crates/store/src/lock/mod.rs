//! Cooperative table locking.
//!
//! Processes sharing a table coordinate through a small lock file:
//!
//! ```text
//! Offset  Size      Field
//! ------  ----      -----
//! 0       4         Number of pending lock requests (n <= 32)
//! 4       8 * 32    Requests: (process id, host id) pairs
//! 260     4         Length of the info blob
//! 264     ...       Info blob
//! ```
//!
//! Integers are big-endian. Byte 0 carries the data lock, byte 1 the "in
//! use" lock: every handle holds a read lock on byte 1 while open, so a
//! handle can tell whether others have the table open.
//!
//! A process that cannot get the data lock registers itself in the request
//! list and keeps retrying; the holder can [`inspect`](LockFile::inspect)
//! the list to see that others are waiting. The info blob is written by the
//! holder of a write lock on release and read back on acquire, which is how
//! changes made by one process become visible to the others.
//!
//! If the lock file cannot be created (e.g. a read-only directory), the
//! lock file runs degraded: every acquire succeeds and nothing is written.

mod locker;

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use byteorder::{BigEndian, ByteOrder};
use coltable_types::config::LockConfig;
pub use locker::{FileLocker, LockType, host_id};

use crate::error::{Error, Result};

/// Maximum number of pending requests recorded.
pub const MAX_REQUESTS: usize = 32;

/// Size of the request list area.
pub const REQUEST_AREA_SIZE: u64 = 4 + (MAX_REQUESTS as u64) * 8;

const DATA_LOCK_BYTE: u64 = 0;
const USE_LOCK_BYTE: u64 = 1;

/// A pending lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    /// Process id of the requester.
    pub pid: u32,
    /// Host id of the requester.
    pub host: u32,
}

impl LockRequest {
    /// The request of this process.
    pub fn current() -> Self {
        Self { pid: std::process::id(), host: host_id() }
    }
}

#[derive(Debug)]
struct Handle {
    file: File,
    writable: bool,
    data: FileLocker,
    in_use: FileLocker,
}

/// A table lock file.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    /// `None` when degraded.
    handle: Option<Handle>,
    me: LockRequest,
    inspect_interval: Duration,
    retry_interval: Duration,
    max_retry_interval: Duration,
    last_inspect: Option<(Instant, bool)>,
    info: Vec<u8>,
}

impl LockFile {
    /// Opens (creating if needed) the lock file at `path`.
    ///
    /// Falls back to read-only access when the file cannot be opened for
    /// writing, and to degraded mode when it cannot be opened at all.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the "in use" lock cannot be taken.
    pub fn open(path: impl AsRef<Path>, config: &LockConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map(|file| (file, true))
            .or_else(|_| File::open(&path).map(|file| (file, false)));
        let handle = match opened {
            Ok((file, writable)) => {
                let mut in_use = FileLocker::new(USE_LOCK_BYTE, 1);
                in_use
                    .acquire(&file, LockType::Read, false)
                    .map_err(|source| Error::FileIo { path: path.clone(), source })?;
                Some(Handle { file, writable, data: FileLocker::new(DATA_LOCK_BYTE, 1), in_use })
            },
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Cannot open lock file, locking is degraded");
                None
            },
        };
        Ok(Self::with_handle(path, handle, config))
    }

    /// A lock file that does no locking at all.
    pub fn degraded(path: impl AsRef<Path>, config: &LockConfig) -> Self {
        Self::with_handle(path.as_ref().to_path_buf(), None, config)
    }

    fn with_handle(path: PathBuf, handle: Option<Handle>, config: &LockConfig) -> Self {
        Self {
            path,
            handle,
            me: LockRequest::current(),
            inspect_interval: config.inspect_interval,
            retry_interval: config.retry_interval,
            max_retry_interval: config.max_retry_interval,
            last_inspect: None,
            info: Vec::new(),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if locking is degraded (every acquire succeeds).
    pub fn is_degraded(&self) -> bool {
        self.handle.is_none()
    }

    /// Returns `true` if a lock covering `kind` is held (always in degraded
    /// mode).
    pub fn has_lock(&self, kind: LockType) -> bool {
        match &self.handle {
            Some(handle) => handle.data.held().is_some_and(|held| held.covers(kind)),
            None => true,
        }
    }

    /// The info blob read by the last successful acquire.
    pub fn info(&self) -> &[u8] {
        &self.info
    }

    fn io_error(&self, source: io::Error) -> Error {
        Error::FileIo { path: self.path.clone(), source }
    }

    /// Acquires the data lock.
    ///
    /// Tries once; if that fails and `attempts != 1`, registers this process
    /// in the request list and retries with exponential backoff, up to
    /// `attempts` tries in total (0 means until it succeeds). On success the
    /// own request and all older ones are removed from the list and the
    /// info blob is read.
    ///
    /// Returns `false` if the lock could not be acquired.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be accessed.
    pub fn acquire(&mut self, kind: LockType, attempts: u32) -> Result<bool> {
        if self.handle.is_none() {
            return Ok(true);
        }
        let mut tries = 0u32;
        let mut registered = false;
        let mut delay = self.retry_interval;
        loop {
            tries += 1;
            if self.try_lock(kind)? {
                break;
            }
            if attempts == 1 {
                return Ok(false);
            }
            if !registered {
                self.add_request()?;
                registered = true;
            }
            if attempts != 0 && tries >= attempts {
                self.remove_request()?;
                tracing::debug!(path = %self.path.display(), tries, "Lock not acquired");
                return Ok(false);
            }
            thread::sleep(delay);
            delay = (delay * 2).min(self.max_retry_interval);
        }
        let info = self.read_info();
        if registered {
            self.remove_request()?;
        }
        self.info = match info {
            Ok(info) => info,
            Err(err) => {
                self.release(None)?;
                return Err(err);
            },
        };
        self.last_inspect = None;
        tracing::debug!(path = %self.path.display(), ?kind, tries, "Lock acquired");
        Ok(true)
    }

    fn try_lock(&mut self, kind: LockType) -> Result<bool> {
        let Some(handle) = &mut self.handle else { return Ok(true) };
        let result = handle.data.acquire(&handle.file, kind, false);
        result.map_err(|source| self.io_error(source))
    }

    /// Releases the data lock, first storing `info` if a write lock is held
    /// and `info` is not empty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the blob cannot be written or the lock cannot
    /// be released.
    pub fn release(&mut self, info: Option<&[u8]>) -> Result<()> {
        let Some(handle) = &self.handle else { return Ok(()) };
        let write_held = handle.writable && handle.data.held() == Some(LockType::Write);
        if write_held && let Some(blob) = info.filter(|b| !b.is_empty()) {
            self.write_info(blob)?;
            self.info = blob.to_vec();
        }
        let Some(handle) = &mut self.handle else { return Ok(()) };
        let result = handle.data.release(&handle.file);
        result.map_err(|source| self.io_error(source))?;
        tracing::debug!(path = %self.path.display(), "Lock released");
        Ok(())
    }

    /// Reports whether other processes are waiting for the lock.
    ///
    /// The request list is read at most once per inspect interval unless
    /// `force` is set; in between the previous answer is returned.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be read.
    pub fn inspect(&mut self, force: bool) -> Result<bool> {
        if self.handle.is_none() {
            return Ok(false);
        }
        if !force
            && let Some((at, pending)) = self.last_inspect
            && at.elapsed() < self.inspect_interval
        {
            return Ok(pending);
        }
        let pending = !self.read_requests()?.is_empty();
        self.last_inspect = Some((Instant::now(), pending));
        Ok(pending)
    }

    /// Returns `true` if another handle has the lock file open.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock state cannot be queried.
    pub fn is_multi_used(&self) -> Result<bool> {
        let Some(handle) = &self.handle else { return Ok(false) };
        let free = handle.in_use.can_lock(&handle.file, LockType::Write).map_err(|source| self.io_error(source))?;
        Ok(!free)
    }

    /// The pending requests.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be read.
    pub fn read_requests(&self) -> Result<Vec<LockRequest>> {
        let bytes = self.read_region(0, REQUEST_AREA_SIZE as usize)?;
        let count = (BigEndian::read_u32(&bytes[0..4]) as usize).min(MAX_REQUESTS);
        Ok((0..count)
            .map(|i| {
                let at = 4 + i * 8;
                LockRequest { pid: BigEndian::read_u32(&bytes[at..]), host: BigEndian::read_u32(&bytes[at + 4..]) }
            })
            .collect())
    }

    fn write_requests(&self, requests: &[LockRequest]) -> Result<()> {
        let mut bytes = vec![0u8; REQUEST_AREA_SIZE as usize];
        BigEndian::write_u32(&mut bytes[0..4], requests.len() as u32);
        for (i, request) in requests.iter().enumerate() {
            let at = 4 + i * 8;
            BigEndian::write_u32(&mut bytes[at..], request.pid);
            BigEndian::write_u32(&mut bytes[at + 4..], request.host);
        }
        self.write_region(0, &bytes)
    }

    fn add_request(&self) -> Result<()> {
        if !self.handle.as_ref().is_some_and(|h| h.writable) {
            return Ok(());
        }
        let mut requests = self.read_requests()?;
        if requests.len() >= MAX_REQUESTS {
            requests.truncate(MAX_REQUESTS - 1);
        }
        requests.push(self.me);
        self.write_requests(&requests)
    }

    /// Removes the own request and every request queued before it.
    fn remove_request(&self) -> Result<()> {
        if !self.handle.as_ref().is_some_and(|h| h.writable) {
            return Ok(());
        }
        let requests = self.read_requests()?;
        let Some(position) = requests.iter().position(|r| *r == self.me) else { return Ok(()) };
        if position > 0 {
            tracing::warn!(path = %self.path.display(), stale = position, "Removed stale lock requests");
        }
        self.write_requests(&requests[position + 1..])
    }

    /// Reads the info blob; its length must not run past the end of the file.
    fn read_info(&self) -> Result<Vec<u8>> {
        let Some(handle) = &self.handle else { return Ok(Vec::new()) };
        let len = self.read_region(REQUEST_AREA_SIZE, 4)?;
        let len = u64::from(BigEndian::read_u32(&len));
        if len == 0 {
            return Ok(Vec::new());
        }
        let file_len = handle.file.metadata().map_err(|source| self.io_error(source))?.len();
        let stored = file_len.saturating_sub(REQUEST_AREA_SIZE + 4);
        if len > stored {
            return Err(Error::Corrupted {
                name: self.path.display().to_string(),
                reason: format!("info blob of {len} bytes but only {stored} stored"),
            });
        }
        self.read_region(REQUEST_AREA_SIZE + 4, len as usize)
    }

    fn write_info(&self, blob: &[u8]) -> Result<()> {
        let mut bytes = vec![0u8; 4 + blob.len()];
        BigEndian::write_u32(&mut bytes[0..4], blob.len() as u32);
        bytes[4..].copy_from_slice(blob);
        self.write_region(REQUEST_AREA_SIZE, &bytes)?;
        if let Some(handle) = &self.handle {
            handle.file.sync_data().map_err(|source| self.io_error(source))?;
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset`; bytes past the end of the file read as
    /// zero.
    fn read_region(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        if let Some(handle) = &self.handle {
            read_at(&handle.file, offset, &mut buf).map_err(|source| self.io_error(source))?;
        }
        Ok(buf)
    }

    fn write_region(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let Some(handle) = &self.handle else { return Ok(()) };
        let mut file = &handle.file;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(bytes))
            .map_err(|source| self.io_error(source))
    }
}

/// Reads into `buf` at `offset`, leaving what lies past the end untouched.
fn read_at(mut file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn config() -> LockConfig {
        LockConfig::builder()
            .retry_interval(Duration::from_millis(1))
            .max_retry_interval(Duration::from_millis(4))
            .inspect_interval(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    #[test]
    fn test_info_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.lock");
        let mut lock = LockFile::open(&path, &config()).unwrap();
        assert!(!lock.is_degraded());
        assert!(lock.acquire(LockType::Write, 1).unwrap());
        assert!(lock.info().is_empty());
        lock.release(Some(b"sync-state")).unwrap();
        assert!(!lock.has_lock(LockType::Read));

        assert!(lock.acquire(LockType::Read, 1).unwrap());
        assert_eq!(lock.info(), b"sync-state");
        // A read lock never writes the blob.
        lock.release(Some(b"ignored")).unwrap();
        assert!(lock.acquire(LockType::Read, 1).unwrap());
        assert_eq!(lock.info(), b"sync-state");
    }

    #[test]
    fn test_oversized_info_length_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.lock");
        let mut lock = LockFile::open(&path, &config()).unwrap();
        lock.write_region(REQUEST_AREA_SIZE, &[0xFF, 0xFF, 0xFF, 0xF0, 1, 2, 3]).unwrap();

        let err = lock.acquire(LockType::Read, 1).unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }), "got {err}");
        assert!(!lock.has_lock(LockType::Read));

        lock.write_info(b"ok").unwrap();
        assert!(lock.acquire(LockType::Read, 1).unwrap());
        assert_eq!(lock.info(), b"ok");
    }

    #[test]
    fn test_request_list_cleanup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.lock");
        let lock = LockFile::open(&path, &config()).unwrap();
        let stale = LockRequest { pid: 1, host: 2 };
        lock.write_requests(&[stale, lock.me, LockRequest { pid: 3, host: 4 }]).unwrap();
        lock.remove_request().unwrap();
        assert_eq!(lock.read_requests().unwrap(), vec![LockRequest { pid: 3, host: 4 }]);
    }

    #[test]
    fn test_full_request_list_overwrites_last() {
        let dir = TempDir::new().unwrap();
        let lock = LockFile::open(dir.path().join("table.lock"), &config()).unwrap();
        let others: Vec<_> = (0..MAX_REQUESTS as u32).map(|pid| LockRequest { pid: pid + 100, host: 0 }).collect();
        lock.write_requests(&others).unwrap();
        lock.add_request().unwrap();
        let requests = lock.read_requests().unwrap();
        assert_eq!(requests.len(), MAX_REQUESTS);
        assert_eq!(requests.last(), Some(&lock.me));
    }

    #[test]
    fn test_inspect_is_time_gated() {
        let dir = TempDir::new().unwrap();
        let mut lock = LockFile::open(dir.path().join("table.lock"), &config()).unwrap();
        assert!(!lock.inspect(false).unwrap());
        lock.write_requests(&[LockRequest { pid: 9, host: 9 }]).unwrap();
        assert!(!lock.inspect(false).unwrap());
        assert!(lock.inspect(true).unwrap());
    }

    #[test]
    fn test_degraded_always_succeeds() {
        let mut lock = LockFile::degraded("/nonexistent/table.lock", &config());
        assert!(lock.is_degraded());
        assert!(lock.acquire(LockType::Write, 1).unwrap());
        assert!(lock.has_lock(LockType::Write));
        assert!(!lock.is_multi_used().unwrap());
        assert!(!lock.inspect(true).unwrap());
        lock.release(Some(b"x")).unwrap();
    }

    #[test]
    fn test_unopenable_path_degrades() {
        let lock = LockFile::open("/nonexistent-dir/table.lock", &config()).unwrap();
        assert!(lock.is_degraded());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_contention_between_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.lock");
        let mut a = LockFile::open(&path, &config()).unwrap();
        assert!(!a.is_multi_used().unwrap());
        let mut b = LockFile::open(&path, &config()).unwrap();
        assert!(a.is_multi_used().unwrap());

        assert!(a.acquire(LockType::Write, 1).unwrap());
        assert!(!b.acquire(LockType::Read, 3).unwrap());
        // The failed attempt cleaned up after itself.
        assert!(!a.inspect(true).unwrap());

        a.release(Some(b"v1")).unwrap();
        assert!(b.acquire(LockType::Read, 1).unwrap());
        assert_eq!(b.info(), b"v1");
        drop(b);
        assert!(!a.is_multi_used().unwrap());
    }
}
