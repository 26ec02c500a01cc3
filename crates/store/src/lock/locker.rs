//! Advisory byte-range locks.
//!
//! On Linux the locks are open-file-description locks, so two handles on
//! the same file conflict even inside one process. Other Unix systems use
//! classic `fcntl` record locks, which only conflict between processes.

use std::{fs::File, io};

/// Kind of lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Shared lock; any number of readers.
    Read,
    /// Exclusive lock.
    Write,
}

impl LockType {
    /// Returns `true` if holding `self` allows what `wanted` allows.
    pub fn covers(self, wanted: LockType) -> bool {
        self == LockType::Write || wanted == LockType::Read
    }
}

/// A lock on the byte range `[start, start + len)` of a file.
#[derive(Debug)]
pub struct FileLocker {
    start: u64,
    len: u64,
    held: Option<LockType>,
}

impl FileLocker {
    /// A locker for `len` bytes at `start`; nothing is locked yet.
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len, held: None }
    }

    /// The lock currently held through this locker.
    pub fn held(&self) -> Option<LockType> {
        self.held
    }

    /// Takes the lock, waiting for it if `wait` is set.
    ///
    /// Returns `false` if the range is locked elsewhere and `wait` is not
    /// set.
    ///
    /// # Errors
    ///
    /// Returns the OS error for failures other than contention.
    pub fn acquire(&mut self, file: &File, kind: LockType, wait: bool) -> io::Result<bool> {
        let locked = sys::set_lock(file, self.start, self.len, Some(kind), wait)?;
        if locked {
            self.held = Some(kind);
        }
        Ok(locked)
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns the OS error if unlocking fails.
    pub fn release(&mut self, file: &File) -> io::Result<()> {
        if self.held.take().is_some() {
            sys::set_lock(file, self.start, self.len, None, false)?;
        }
        Ok(())
    }

    /// Tests whether a lock of `kind` could be taken, without taking it.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the test fails.
    pub fn can_lock(&self, file: &File, kind: LockType) -> io::Result<bool> {
        sys::test_lock(file, self.start, self.len, kind)
    }
}

/// Host identifier recorded in lock requests.
pub fn host_id() -> u32 {
    sys::host_id()
}

#[cfg(unix)]
#[allow(unsafe_code)]
mod sys {
    use std::{fs::File, io, os::fd::AsRawFd};

    use super::LockType;

    #[cfg(target_os = "linux")]
    const SET_LOCK: libc::c_int = libc::F_OFD_SETLK;
    #[cfg(target_os = "linux")]
    const SET_LOCK_WAIT: libc::c_int = libc::F_OFD_SETLKW;
    #[cfg(target_os = "linux")]
    const GET_LOCK: libc::c_int = libc::F_OFD_GETLK;

    #[cfg(not(target_os = "linux"))]
    const SET_LOCK: libc::c_int = libc::F_SETLK;
    #[cfg(not(target_os = "linux"))]
    const SET_LOCK_WAIT: libc::c_int = libc::F_SETLKW;
    #[cfg(not(target_os = "linux"))]
    const GET_LOCK: libc::c_int = libc::F_GETLK;

    fn lock_type(kind: Option<LockType>) -> libc::c_short {
        match kind {
            Some(LockType::Read) => libc::F_RDLCK as libc::c_short,
            Some(LockType::Write) => libc::F_WRLCK as libc::c_short,
            None => libc::F_UNLCK as libc::c_short,
        }
    }

    fn region(start: u64, len: u64, kind: Option<LockType>) -> libc::flock {
        // SAFETY: `flock` is a plain C struct for which all-zero bytes are a
        // valid value; open-file-description locks require `l_pid == 0`.
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = lock_type(kind);
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = start as libc::off_t;
        fl.l_len = len as libc::off_t;
        fl
    }

    fn fcntl(file: &File, cmd: libc::c_int, fl: &mut libc::flock) -> io::Result<()> {
        loop {
            // SAFETY: the descriptor is owned by `file`, which outlives the
            // call, and `fl` points to a valid, initialized `flock`.
            let rc = unsafe { libc::fcntl(file.as_raw_fd(), cmd, fl as *mut libc::flock) };
            if rc != -1 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn is_contention(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::WouldBlock
            || matches!(err.raw_os_error(), Some(code) if code == libc::EAGAIN || code == libc::EACCES)
    }

    pub(super) fn set_lock(
        file: &File,
        start: u64,
        len: u64,
        kind: Option<LockType>,
        wait: bool,
    ) -> io::Result<bool> {
        let mut fl = region(start, len, kind);
        let cmd = if wait && kind.is_some() { SET_LOCK_WAIT } else { SET_LOCK };
        match fcntl(file, cmd, &mut fl) {
            Ok(()) => Ok(true),
            Err(err) if is_contention(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub(super) fn test_lock(file: &File, start: u64, len: u64, kind: LockType) -> io::Result<bool> {
        let mut fl = region(start, len, Some(kind));
        fcntl(file, GET_LOCK, &mut fl)?;
        Ok(fl.l_type == libc::F_UNLCK as libc::c_short)
    }

    pub(super) fn host_id() -> u32 {
        // SAFETY: gethostid takes no arguments and only reads system state.
        let id = unsafe { libc::gethostid() };
        id as u32
    }
}

#[cfg(not(unix))]
mod sys {
    use std::{fs::File, io};

    use super::LockType;

    pub(super) fn set_lock(_: &File, _: u64, _: u64, _: Option<LockType>, _: bool) -> io::Result<bool> {
        Ok(true)
    }

    pub(super) fn test_lock(_: &File, _: u64, _: u64, _: LockType) -> io::Result<bool> {
        Ok(true)
    }

    pub(super) fn host_id() -> u32 {
        0
    }
}

#[cfg(all(test, target_os = "linux"))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::fs::OpenOptions;

    use tempfile::TempDir;

    use super::*;

    fn open(path: &std::path::Path) -> File {
        OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path).unwrap()
    }

    #[test]
    fn test_write_excludes_other_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let (a, b) = (open(&path), open(&path));
        let mut first = FileLocker::new(0, 1);
        let mut second = FileLocker::new(0, 1);

        assert!(first.acquire(&a, LockType::Write, false).unwrap());
        assert!(!second.acquire(&b, LockType::Read, false).unwrap());
        assert!(!second.can_lock(&b, LockType::Read).unwrap());

        first.release(&a).unwrap();
        assert!(second.acquire(&b, LockType::Read, false).unwrap());
        assert_eq!(second.held(), Some(LockType::Read));
    }

    #[test]
    fn test_readers_share() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let (a, b) = (open(&path), open(&path));
        let mut first = FileLocker::new(1, 1);
        let mut second = FileLocker::new(1, 1);
        assert!(first.acquire(&a, LockType::Read, false).unwrap());
        assert!(second.acquire(&b, LockType::Read, false).unwrap());
        assert!(!second.can_lock(&b, LockType::Write).unwrap());
    }

    #[test]
    fn test_ranges_are_independent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let (a, b) = (open(&path), open(&path));
        let mut data = FileLocker::new(0, 1);
        let mut in_use = FileLocker::new(1, 1);
        assert!(data.acquire(&a, LockType::Write, false).unwrap());
        assert!(in_use.acquire(&b, LockType::Write, false).unwrap());
    }

    #[test]
    fn test_covers() {
        assert!(LockType::Write.covers(LockType::Read));
        assert!(LockType::Read.covers(LockType::Read));
        assert!(!LockType::Read.covers(LockType::Write));
    }
}
