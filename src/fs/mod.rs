//! Filesystem views over an archive, as consumed by
//! [`FileServer`](crate::serve::FileServer).
//!
//! Archive entries decompress front to back and cannot seek. Three views
//! trade that off differently:
//!
//! - [`ArchiveFs`]: plain forward-only files
//! - [`SeekableFs`]: files that can rewind to the start by re-opening, enough
//!   for content sniffing followed by a full read
//! - [`BufferedFs`]: files read fully into memory on open, seekable anywhere

mod archive;
mod buffered;
mod seekable;

pub use archive::{ArchiveFile, ArchiveFs};
pub use buffered::{BufferedFile, BufferedFs};
pub use seekable::{SeekableFile, SeekableFs};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{self, SeekFrom};

/// Metadata of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Base name; `.` for the root directory
    pub name: String,
    /// Uncompressed size, 0 for directories
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// An open file or directory.
#[async_trait]
pub trait File: Send {
    fn info(&self) -> &FileInfo;

    /// Read the next bytes; 0 at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reposition the file. Views that cannot seek fail with
    /// [`io::ErrorKind::Unsupported`].
    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file does not support seeking",
        ))
    }

    /// Entries of a directory, sorted by name.
    fn read_dir(&self) -> io::Result<Vec<FileInfo>> {
        Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", self.info().name),
        ))
    }

    /// Release the underlying stream. Later reads fail.
    fn close(&mut self) {}
}

/// A tree of files addressed by clean slash-separated paths, `.` being the
/// root.
#[async_trait]
pub trait FileSystem: Send + Sync {
    type File: File + 'static;

    async fn open(&self, name: &str) -> io::Result<Self::File>;
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::other("file already closed")
}
