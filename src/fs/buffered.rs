use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, SeekFrom};

use super::{File, FileInfo, FileSystem};

/// Largest initial allocation made from a file's declared size.
const MAX_PREALLOC: u64 = 1 << 20;

/// Reads every regular file fully into memory when it is opened, making it
/// seekable anywhere.
///
/// Costs one full decompression and the file's size in memory per open, in
/// exchange for range requests and content sniffing on any file.
#[derive(Clone)]
pub struct BufferedFs<F> {
    inner: F,
}

impl<F> BufferedFs<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: FileSystem + 'static> FileSystem for BufferedFs<F> {
    type File = BufferedFile<F::File>;

    async fn open(&self, name: &str) -> io::Result<BufferedFile<F::File>> {
        let mut file = self.inner.open(name).await?;
        if file.info().is_dir {
            return Ok(BufferedFile::Dir(file));
        }

        let mut data = Vec::with_capacity(file.info().size.min(MAX_PREALLOC) as usize);
        let mut chunk = vec![0u8; 32 * 1024];
        loop {
            match file.read(&mut chunk).await? {
                0 => break,
                n => data.extend_from_slice(&chunk[..n]),
            }
        }
        let info = file.info().clone();
        file.close();

        Ok(BufferedFile::Data {
            info,
            data: Bytes::from(data),
            pos: 0,
        })
    }
}

/// A file opened from a [`BufferedFs`].
pub enum BufferedFile<T> {
    /// Directories are passed through untouched
    Dir(T),
    Data { info: FileInfo, data: Bytes, pos: u64 },
}

#[async_trait]
impl<T: File + 'static> File for BufferedFile<T> {
    fn info(&self) -> &FileInfo {
        match self {
            BufferedFile::Dir(dir) => dir.info(),
            BufferedFile::Data { info, .. } => info,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BufferedFile::Dir(dir) => dir.read(buf).await,
            BufferedFile::Data { data, pos, .. } => {
                let start = (*pos).min(data.len() as u64) as usize;
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                *pos += n as u64;
                Ok(n)
            }
        }
    }

    async fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let BufferedFile::Data { data, pos, .. } = self else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot seek a directory",
            ));
        };
        let new_pos = match target {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => pos.checked_add_signed(delta),
            SeekFrom::End(delta) => (data.len() as u64).checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        *pos = new_pos;
        Ok(new_pos)
    }

    fn read_dir(&self) -> io::Result<Vec<FileInfo>> {
        match self {
            BufferedFile::Dir(dir) => dir.read_dir(),
            BufferedFile::Data { info, .. } => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", info.name),
            )),
        }
    }
}
