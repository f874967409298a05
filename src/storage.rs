//! Destination file I/O.
//!
//! Opens the destination for writing without truncating previously written
//! bytes (resumability depends on this), supports concurrent offset writes
//! (pwrite-style), and optional preallocation when the total size is known.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Writer for the destination file. Safe to clone and use from multiple
/// partition threads; partitions write strictly disjoint byte regions, so each
/// `write_at` is independent.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl StorageWriter {
    /// Opens (or creates) the destination. Never truncates: bytes written by a
    /// previous, interrupted run stay in place for resuming.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Grows the file to `size` bytes up front. On Unix tries
    /// `posix_fallocate` for real block allocation, falling back to `set_len`.
    /// Never shrinks an already larger file.
    pub fn preallocate(&self, size: u64) -> io::Result<()> {
        if self.file.metadata()?.len() >= size {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size)
    }

    /// Writes `data` at `offset` without moving any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Non-Unix fallback: seek + write on a cloned handle.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Truncates the file to zero bytes (the discard-partial-bytes policy).
    pub fn clear(&self) -> io::Result<()> {
        self.file.set_len(0)
    }

    /// Flushes file data to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn open_write_at_disjoint_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let writer = StorageWriter::open(&path).unwrap();
        writer.preallocate(20).unwrap();

        let clone = writer.clone();
        writer.write_at(0, b"aaaa").unwrap();
        clone.write_at(10, b"bbbb").unwrap();
        writer.write_at(4, b"cccc").unwrap();
        writer.sync().unwrap();

        let mut buf = vec![0u8; 20];
        std::fs::File::open(&path)
            .unwrap()
            .read_exact(&mut buf)
            .unwrap();
        assert_eq!(&buf[0..4], b"aaaa");
        assert_eq!(&buf[4..8], b"cccc");
        assert_eq!(&buf[10..14], b"bbbb");
    }

    #[test]
    fn reopen_does_not_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.bin");
        {
            let writer = StorageWriter::open(&path).unwrap();
            writer.write_at(0, b"keep me").unwrap();
            writer.sync().unwrap();
        }
        let writer = StorageWriter::open(&path).unwrap();
        writer.write_at(7, b" around").unwrap();
        writer.sync().unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content, b"keep me around");
    }

    #[test]
    fn preallocate_never_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grown.bin");
        let writer = StorageWriter::open(&path).unwrap();
        writer.preallocate(100).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
        writer.preallocate(10).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
    }

    #[test]
    fn clear_discards_all_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleared.bin");
        let writer = StorageWriter::open(&path).unwrap();
        writer.write_at(0, b"soon gone").unwrap();
        writer.clear().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
