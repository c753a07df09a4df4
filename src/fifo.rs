//! The named pipe the data to forward comes from.
//!
//! The FIFO is opened once, read-write, and kept open until the bridge
//! terminates. Holding the write side ourselves means a read never reports
//! end-of-file when the last client closes its end, so the pipe keeps working
//! across client connections.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read},
    os::fd::AsFd,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{info, warn};
use nix::{
    poll::{poll, PollFd, PollFlags, PollTimeout},
    sys::stat::Mode,
    unistd::{access, mkfifo, AccessFlags},
};

use crate::error::{Error, Result};

// =============================================================================
// Public Interface
// =============================================================================

/// What [`ensure`] found or did at the FIFO path.
#[derive(Debug)]
pub enum Preparation {
    /// Something readable was already there.
    AlreadyExists,
    /// The FIFO was created.
    Created,
    /// The FIFO could not be created; opening it will tell whether that
    /// matters.
    CreateFailed(nix::Error),
}

/// Make sure a FIFO exists at `path`, creating it with owner-only
/// permissions when nothing is there yet.
pub fn ensure(path: &Path) -> Preparation {
    if access(path, AccessFlags::R_OK).is_ok() {
        info!("server fifo '{}' already exists", path.display());
        return Preparation::AlreadyExists;
    }
    match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) => {
            info!("created server fifo '{}'", path.display());
            Preparation::Created
        }
        Err(e) => {
            warn!("unable to create server fifo '{}': {}", path.display(), e);
            Preparation::CreateFailed(e)
        }
    }
}

/// Result of waiting for data on the FIFO.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Readiness {
    /// Data can be read without blocking.
    Ready,
    /// The timeout elapsed first.
    TimedOut,
}

/// The read end of the FIFO.
#[derive(Debug)]
pub struct Fifo {
    file: File,
    path: PathBuf,
}

impl Fifo {
    /// Open the FIFO at `path` for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::FifoOpen {
                path: path.to_owned(),
                source,
            })?;
        Ok(Fifo {
            file,
            path: path.to_owned(),
        })
    }

    /// The FIFO path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until data is available or `timeout` elapses. Timeouts are
    /// rounded up to whole milliseconds, so that a non-zero timeout never
    /// turns into a non-blocking poll, and capped when too long for `poll`.
    pub fn wait(&self, timeout: Duration) -> nix::Result<Readiness> {
        let millis = i32::try_from(ceil_millis(timeout)).unwrap_or(i32::MAX);
        let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout)? {
            0 => Ok(Readiness::TimedOut),
            _ => Ok(Readiness::Ready),
        }
    }

    /// Read whatever is available, at most `buf.len()` bytes. Anything beyond
    /// that stays in the pipe for the next read.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

fn ceil_millis(timeout: Duration) -> u128 {
    let millis = timeout.as_millis();
    match timeout.subsec_nanos() % 1_000_000 {
        0 => millis,
        _ => millis + 1,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::{fs, io::Write, os::unix::fs::FileTypeExt};

    #[test]
    fn creates_missing_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arduino");

        assert!(matches!(ensure(&path), Preparation::Created));
        assert!(fs::metadata(&path).unwrap().file_type().is_fifo());

        assert!(matches!(ensure(&path), Preparation::AlreadyExists));
    }

    #[test]
    fn creation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/arduino");

        assert!(matches!(ensure(&path), Preparation::CreateFailed(_)));
        assert!(matches!(Fifo::open(&path), Err(Error::FifoOpen { .. })));
    }

    #[test]
    fn wait_times_out_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arduino");
        ensure(&path);

        let fifo = Fifo::open(&path).unwrap();
        assert_eq!(
            fifo.wait(Duration::from_millis(20)).unwrap(),
            Readiness::TimedOut
        );
    }

    #[test]
    fn sub_millisecond_timeouts_still_block() {
        assert_eq!(ceil_millis(Duration::ZERO), 0);
        assert_eq!(ceil_millis(Duration::from_micros(1)), 1);
        assert_eq!(ceil_millis(Duration::from_micros(500)), 1);
        assert_eq!(ceil_millis(Duration::from_millis(5)), 5);
        assert_eq!(ceil_millis(Duration::from_micros(5001)), 6);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arduino");
        ensure(&path);

        let fifo = Fifo::open(&path).unwrap();
        let started = std::time::Instant::now();
        assert_eq!(
            fifo.wait(Duration::from_micros(500)).unwrap(),
            Readiness::TimedOut
        );
        assert!(started.elapsed() >= Duration::from_micros(500));
    }

    #[test]
    fn reads_are_bounded_by_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arduino");
        ensure(&path);

        let mut fifo = Fifo::open(&path).unwrap();
        let mut client = OpenOptions::new().write(true).open(&path).unwrap();
        client.write_all(b"0123456789").unwrap();

        assert_eq!(
            fifo.wait(Duration::from_secs(5)).unwrap(),
            Readiness::Ready
        );
        let mut buf = [0u8; 4];
        assert_eq!(fifo.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");

        // The rest is still there, and closing the client is no end-of-file.
        drop(client);
        let mut buf = [0u8; 16];
        assert_eq!(fifo.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"456789");
        assert_eq!(
            fifo.wait(Duration::from_millis(20)).unwrap(),
            Readiness::TimedOut
        );
    }
}
